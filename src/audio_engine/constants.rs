//! Audio engine configuration constants and limits.

/// Sample rate of the mix bus in Hz.
pub const MIX_SAMPLE_RATE_HZ: u32 = 44_100;

/// Number of channels on the mix bus.
pub const MIX_CHANNELS: usize = 2;

/// Frames delivered per buffer to the mix-bus tap.
pub const TAP_BUFFER_FRAMES: u32 = 1024;

/// Maximum number of tracks attached to the mixer at the same time.
pub const MAX_TRACKS: usize = 32;

/// Minimum playback speed multiplier (25%).
pub const SPEED_MIN: f32 = 0.25;

/// Maximum playback speed multiplier (400%).
pub const SPEED_MAX: f32 = 4.0;

/// Speed assigned to a freshly selected track.
pub const SPEED_DEFAULT: f32 = 1.0;

/// Minimum volume level (silence).
pub const VOLUME_MIN: f32 = 0.0;

/// Maximum volume level (100%).
pub const VOLUME_MAX: f32 = 1.0;

/// Volume assigned to a freshly selected track.
pub const VOLUME_DEFAULT: f32 = 0.5;

/// Delay before a track rescheduled after a speed change starts looping again.
pub const SPEED_CHANGE_LEAD_SECONDS: f32 = 0.1;

/// Power reported for silent buffers, in dB.
pub const LEVEL_FLOOR_DB: f32 = -160.0;

/// Refresh period of the visual level meter, independent of buffer delivery.
pub const METER_REFRESH_MS: u64 = 20;

/// Time the level meter takes to glide from its last value to a new one.
pub const METER_GLIDE_MS: u64 = 100;

/// Number of buckets in an extracted waveform envelope.
pub const WAVEFORM_BUCKETS: usize = 300;

/// Capacity of the control and audio message rings.
pub const MESSAGE_RING_CAPACITY: usize = 1024;

/// Capacity of the live-input level ring.
pub const INPUT_LEVEL_RING_CAPACITY: usize = 256;

/// File name of the most recent bounce, placed in the writable directory.
pub const BOUNCE_FILE_NAME: &str = "output.wav";

/// Extension of every PCM asset, bundled or recorded.
pub const ASSET_EXTENSION: &str = "wav";

/// Label of the live-input recording (file stem and track name).
pub const LIVE_INPUT_LABEL: &str = "Microphone";
