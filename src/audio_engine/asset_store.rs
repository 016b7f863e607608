//! Sound asset store.
//!
//! Resolves a `(category, name)` pair to a readable PCM file: either a bundled, read-only
//! resource from the catalog, or a live-input recording in the writable directory.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::audio_engine::constants::{ASSET_EXTENSION, BOUNCE_FILE_NAME};
use crate::audio_engine::errors::AssetError;

/// Fixed sample categories, plus the distinguished live-input category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Guitar,
    Drums,
    Brass,
    LiveInput,
}

impl Category {
    /// Categories backed by bundled assets.
    pub const BUNDLED: [Category; 3] = [Category::Guitar, Category::Drums, Category::Brass];

    pub fn label(self) -> &'static str {
        match self {
            Self::Guitar => "Guitar",
            Self::Drums => "Drums",
            Self::Brass => "Brass",
            Self::LiveInput => "Microphone",
        }
    }

    pub fn is_live_input(self) -> bool {
        self == Self::LiveInput
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where an asset's PCM bytes live.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetLocation {
    /// Read-only resource shipped with the application.
    Bundled(PathBuf),
    /// File in the writable directory (live-input material).
    Recorded(PathBuf),
}

/// A resolved, immutable reference to a PCM source.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SoundAsset {
    name: String,
    category: Category,
    location: AssetLocation,
}

impl SoundAsset {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn category(&self) -> Category {
        self.category
    }

    pub fn location(&self) -> &AssetLocation {
        &self.location
    }

    pub fn path(&self) -> &Path {
        match &self.location {
            AssetLocation::Bundled(path) | AssetLocation::Recorded(path) => path,
        }
    }
}

/// Catalog shipped with the instrument.
pub fn default_catalog() -> BTreeMap<Category, Vec<String>> {
    let mut catalog = BTreeMap::new();
    catalog.insert(
        Category::Guitar,
        vec!["Guitar 1".to_string(), "Guitar 2".to_string()],
    );
    catalog.insert(
        Category::Drums,
        vec!["Drums 1".to_string(), "Drums 2".to_string()],
    );
    catalog.insert(
        Category::Brass,
        vec![
            "Brass 1".to_string(),
            "Brass 2".to_string(),
            "Brass 3".to_string(),
        ],
    );
    catalog
}

#[derive(Debug, Clone)]
pub struct AssetStore {
    bundle_dir: PathBuf,
    writable_dir: PathBuf,
    catalog: BTreeMap<Category, Vec<String>>,
}

impl AssetStore {
    pub fn new(bundle_dir: impl Into<PathBuf>, writable_dir: impl Into<PathBuf>) -> Self {
        Self::with_catalog(bundle_dir, writable_dir, default_catalog())
    }

    pub fn with_catalog(
        bundle_dir: impl Into<PathBuf>,
        writable_dir: impl Into<PathBuf>,
        catalog: BTreeMap<Category, Vec<String>>,
    ) -> Self {
        Self {
            bundle_dir: bundle_dir.into(),
            writable_dir: writable_dir.into(),
            catalog,
        }
    }

    /// Names available in a bundled category. Live input has no catalog.
    pub fn catalog(&self, category: Category) -> &[String] {
        self.catalog
            .get(&category)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn writable_dir(&self) -> &Path {
        &self.writable_dir
    }

    /// Fixed location of the most recent bounce.
    pub fn bounce_path(&self) -> PathBuf {
        self.writable_dir.join(BOUNCE_FILE_NAME)
    }

    /// Location of the live-input recording with the given label.
    pub fn live_input_path(&self, label: &str) -> PathBuf {
        self.writable_dir
            .join(format!("{label}.{ASSET_EXTENSION}"))
    }

    /// Resolves a sample identifier to its PCM source.
    ///
    /// Bundled names must be listed in the catalog and present on disk; live-input names
    /// must have been recorded into the writable directory.
    pub fn resolve(&self, category: Category, name: &str) -> Result<SoundAsset, AssetError> {
        let not_found = || AssetError::NotFound {
            category,
            name: name.to_string(),
        };

        let location = if category.is_live_input() {
            AssetLocation::Recorded(self.live_input_path(name))
        } else {
            if !self.catalog(category).iter().any(|n| n == name) {
                return Err(not_found());
            }
            AssetLocation::Bundled(
                self.bundle_dir
                    .join(format!("{name}.{ASSET_EXTENSION}")),
            )
        };

        let asset = SoundAsset {
            name: name.to_string(),
            category,
            location,
        };
        if !asset.path().is_file() {
            return Err(not_found());
        }
        Ok(asset)
    }
}
