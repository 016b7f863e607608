//! Looped multi-track sampler core.
//!
//! Sound clips are layered into looping tracks and mixed on a real-time thread. The mix can
//! be metered, bounced to a file, and replayed with a waveform envelope and a progress clock.

pub mod audio_engine;
pub mod messages;

pub use audio_engine::asset_store::{AssetStore, Category, SoundAsset};
pub use audio_engine::errors::{AssetError, EngineError, SampleLoadError, WaveformError};
pub use audio_engine::track::{Track, TrackId};
pub use audio_engine::waveform::WaveformEnvelope;
pub use audio_engine::{AudioEngine, EngineConfig, EngineObserver};
