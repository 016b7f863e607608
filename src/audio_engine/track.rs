//! Tracks and the process-wide mix state.
//!
//! These types live on the control thread only. The real-time side sees a track solely
//! through its [`PlayerId`].

use std::fmt;

use crate::audio_engine::asset_store::SoundAsset;
use crate::audio_engine::constants::{
    SPEED_DEFAULT, SPEED_MAX, SPEED_MIN, VOLUME_DEFAULT, VOLUME_MAX, VOLUME_MIN,
};
use crate::messages::PlayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TrackId(pub u32);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "track#{}", self.0)
    }
}

/// Clamps `value` into `[min, max]`; non-finite input keeps `current`.
fn clamp_or_keep(value: f32, current: f32, min: f32, max: f32) -> f32 {
    if value.is_finite() {
        value.clamp(min, max)
    } else {
        current
    }
}

/// A looping playback unit wrapping one sound asset.
#[derive(Debug, Clone)]
pub struct Track {
    id: TrackId,
    asset: SoundAsset,
    volume: f32,
    speed: f32,
    muted: bool,
    playing: bool,
    player: Option<PlayerId>,
}

impl Track {
    pub fn new(id: TrackId, asset: SoundAsset) -> Self {
        Self {
            id,
            asset,
            volume: VOLUME_DEFAULT,
            speed: SPEED_DEFAULT,
            muted: false,
            playing: false,
            player: None,
        }
    }

    pub fn id(&self) -> TrackId {
        self.id
    }

    pub fn asset(&self) -> &SoundAsset {
        &self.asset
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn player(&self) -> Option<PlayerId> {
        self.player
    }

    /// Sets the volume, clamped to `[0, 1]`. Returns the stored value.
    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = clamp_or_keep(volume, self.volume, VOLUME_MIN, VOLUME_MAX);
        self.volume
    }

    /// Sets the speed multiplier, clamped to `[0.25, 4]`. Returns the stored value.
    pub fn set_speed(&mut self, speed: f32) -> f32 {
        self.speed = clamp_or_keep(speed, self.speed, SPEED_MIN, SPEED_MAX);
        self.speed
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub(crate) fn attach_player(&mut self, player: PlayerId) {
        self.player = Some(player);
    }

    /// Invalidates the player handle, returning the one that was attached.
    pub(crate) fn detach_player(&mut self) -> Option<PlayerId> {
        self.playing = false;
        self.player.take()
    }
}

/// Ordered set of selected tracks, the current track and the global play flag.
#[derive(Debug, Default)]
pub struct MixState {
    tracks: Vec<Track>,
    current: Option<TrackId>,
    playing: bool,
    next_id: u32,
}

impl MixState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracks in selection order.
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing;
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.and_then(|id| self.get(id))
    }

    pub fn current_id(&self) -> Option<TrackId> {
        self.current
    }

    /// Makes an attached track current. Returns `false` for unknown ids.
    pub fn set_current(&mut self, id: TrackId) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.current = Some(id);
        true
    }

    pub fn get(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn get_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.iter_mut().find(|t| t.id == id)
    }

    pub fn tracks_mut(&mut self) -> impl Iterator<Item = &mut Track> {
        self.tracks.iter_mut()
    }

    pub fn find_by_asset(&self, asset: &SoundAsset) -> Option<TrackId> {
        self.tracks.iter().find(|t| &t.asset == asset).map(|t| t.id)
    }

    /// Appends a new track for `asset` and makes it current.
    pub fn push(&mut self, asset: SoundAsset) -> TrackId {
        let id = TrackId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);
        self.tracks.push(Track::new(id, asset));
        self.current = Some(id);
        id
    }

    /// Removes a track. If it was current, the last remaining track becomes current.
    pub fn remove(&mut self, id: TrackId) -> Option<Track> {
        let index = self.tracks.iter().position(|t| t.id == id)?;
        let track = self.tracks.remove(index);
        if self.current == Some(id) {
            self.current = self.tracks.last().map(|t| t.id);
        }
        Some(track)
    }

    /// Empties the state, returning the removed tracks.
    pub fn clear(&mut self) -> Vec<Track> {
        self.current = None;
        self.playing = false;
        std::mem::take(&mut self.tracks)
    }
}
