//! Message definitions for communication between the control and audio threads.
//!
//! This module defines the enums that serve as the wire format for messages passed through the
//! ring buffers between the control thread and the real-time audio thread.

use std::fmt;
use std::sync::Arc;

use crate::audio_engine::bounce_recorder::BounceWriter;

/// Immutable, interleaved PCM frames shared between threads.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    pub channels: usize,
    pub samples: Arc<[f32]>,
}

impl SampleBuffer {
    pub fn new(channels: usize, samples: Vec<f32>) -> Self {
        Self {
            channels,
            samples: Arc::from(samples.into_boxed_slice()),
        }
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

/// Handle to a player slot inside the real-time mixer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub u32);

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "player#{}", self.0)
    }
}

/// Message that is emitted from the control thread.
///
/// Every message takes effect at the next buffer boundary on the audio thread.
#[derive(Debug)]
pub enum ControlMessage {
    /// Attach a looping player for a decoded asset.
    AttachPlayer {
        id: PlayerId,
        sample: SampleBuffer,
        volume: f32,
        muted: bool,
        start: bool,
    },

    /// Replace a player's loop buffer and restart it from frame 0 after `lead_frames`.
    Reschedule {
        id: PlayerId,
        sample: SampleBuffer,
        lead_frames: usize,
        resume: bool,
    },

    /// Set per-player gain (linear scalar, 0.0 to 1.0).
    SetPlayerVolume { id: PlayerId, volume: f32 },

    /// Mute or unmute a player without detaching it.
    SetPlayerMuted { id: PlayerId, muted: bool },

    /// Start or pause a single player.
    SetPlayerRunning { id: PlayerId, running: bool },

    /// Start every unmuted player, or pause every player.
    SetPlaying(bool),

    /// Stop and release a player.
    DetachPlayer { id: PlayerId },

    /// Stop and release every player.
    DetachAll(),

    /// Begin persisting every tapped buffer to the writer.
    StartBounce(Box<BounceWriter>),

    /// Stop persisting and hand the writer back to the control thread.
    StopBounce(),

    /// Play a finished bounce once through the mix bus.
    PlayBounce { sample: SampleBuffer },

    /// Stop bounce playback and rewind it.
    StopBouncePlayback(),
}

/// Message that is emitted from the audio thread.
#[derive(Debug)]
pub enum AudioMessage {
    /// Channel-0 power of the last mixed buffer, in dB.
    Level(f32),

    /// The bounce writer, quiesced and ready to be finalized.
    BounceStopped(Box<BounceWriter>),

    /// The one-shot bounce player reached its last frame.
    BouncePlaybackEnded(),
}
