//! Audio-specific error types.

use std::path::PathBuf;

use thiserror::Error;

use crate::audio_engine::asset_store::Category;

/// Errors that can occur while loading audio files.
#[derive(Debug, Error)]
pub enum SampleLoadError {
    /// Failed to open the audio file.
    #[error("failed to open file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the audio file.
    #[error("failed to decode audio file: {0}")]
    Decode(#[from] symphonia::core::errors::Error),

    /// Failed to create resampler.
    #[error("failed to create resampler: {0}")]
    ResamplerConstruction(#[from] rubato::ResamplerConstructionError),

    /// Failed to resample audio.
    #[error("failed to resample audio: {0}")]
    Resample(#[from] rubato::ResampleError),

    /// Audio file has no default track.
    #[error("audio file has no default track")]
    NoDefaultTrack,

    /// Audio file is missing sample rate information.
    #[error("audio file is missing a sample rate")]
    MissingSampleRate,

    /// Audio file is missing channel information.
    #[error("audio file is missing channel information")]
    MissingChannels,

    /// Audio file decoded to zero frames.
    #[error("audio file contains no frames")]
    EmptyAudio,

    /// Unsupported channel mapping configuration.
    #[error(
        "unsupported channel mapping: file has {file_channels} channels, output has {output_channels} channels"
    )]
    UnsupportedChannels {
        /// Number of channels in the source file.
        file_channels: usize,
        /// Number of channels expected for output.
        output_channels: usize,
    },
}

/// Errors raised by the sound asset store.
#[derive(Debug, Error)]
pub enum AssetError {
    /// No asset with this name exists in the category.
    #[error("no {category} asset named {name:?}")]
    NotFound { category: Category, name: String },
}

/// Errors raised while extracting a waveform envelope from a finished recording.
#[derive(Debug, Error)]
pub enum WaveformError {
    /// The recording could not be parsed.
    #[error("failed to decode recording {path}: {source}")]
    DecodeFailed {
        path: PathBuf,
        #[source]
        source: SampleLoadError,
    },
}

/// Errors surfaced to the control domain by [`AudioEngine`](crate::audio_engine::AudioEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The asset store has no such sample.
    #[error(transparent)]
    NotFound(#[from] AssetError),

    /// A bundled or recorded source could not be decoded.
    #[error("asset {name:?} is unreadable: {source}")]
    AssetUnreadable {
        name: String,
        #[source]
        source: SampleLoadError,
    },

    /// Microphone permission denied or input device missing.
    #[error("input device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The referenced track is not attached.
    #[error("unknown track {0}")]
    UnknownTrack(u32),

    /// Every mixer slot is taken.
    #[error("track limit reached ({0} tracks)")]
    TrackLimit(usize),

    /// The output stream is already running.
    #[error("audio engine already running")]
    AlreadyRunning,

    /// A bounce recording is already open.
    #[error("a recording session is already in progress")]
    RecordingInProgress,

    /// No bounce recording is open.
    #[error("no recording session in progress")]
    NotRecording,

    /// Live input is already being monitored.
    #[error("live input is already being monitored")]
    AlreadyListening,

    /// Live input is not being monitored.
    #[error("live input is not being monitored")]
    NotListening,

    /// There is no finished bounce to play back.
    #[error("no bounce recording available")]
    NoBounce,

    /// The control ring is full.
    #[error("failed to send {0} - buffer may be full")]
    QueueFull(&'static str),

    /// Output stream setup or start failed.
    #[error("audio stream error: {0}")]
    Stream(String),

    /// Creating or finalizing a recorded WAV file failed.
    #[error("wav file error: {0}")]
    WavFile(#[from] hound::Error),

    /// Filesystem error in the writable directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
