//! Bounce recording: rendering the live mix down to a single file.
//!
//! [`BounceRecorder`] lives on the control thread and owns the session lifecycle. The open
//! file is a [`BounceWriter`], which is moved into the mixer while recording, written from
//! the audio callback, and moved back to the control thread to be finalized. The writer can
//! therefore never be closed while a callback is writing to it.

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavSpec, WavWriter};

use crate::audio_engine::errors::EngineError;

/// Open bounce file, written from the audio thread.
pub struct BounceWriter {
    path: PathBuf,
    writer: WavWriter<BufWriter<File>>,
    channels: usize,
    frames_written: u64,
    failed_writes: u64,
}

impl fmt::Debug for BounceWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BounceWriter")
            .field("path", &self.path)
            .field("channels", &self.channels)
            .field("frames_written", &self.frames_written)
            .field("failed_writes", &self.failed_writes)
            .finish()
    }
}

impl BounceWriter {
    /// Creates (or truncates) the file at `path` using the mix bus format.
    pub fn create(path: &Path, channels: usize, sample_rate: u32) -> Result<Self, hound::Error> {
        let spec = WavSpec {
            channels: channels as u16,
            sample_rate,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)?;
        Ok(Self {
            path: path.to_path_buf(),
            writer,
            channels,
            frames_written: 0,
            failed_writes: 0,
        })
    }

    /// Appends one tapped buffer. Best-effort: a failing buffer is counted and skipped.
    pub fn write_interleaved(&mut self, buffer: &[f32]) {
        if self.channels == 0 {
            return;
        }

        let frames = buffer.len() / self.channels;
        let whole = &buffer[..frames * self.channels];
        for &sample in whole {
            if let Err(err) = self.writer.write_sample(sample) {
                if self.failed_writes == 0 {
                    log::warn!("Bounce write failed, skipping buffer: {err}");
                }
                self.failed_writes += 1;
                return;
            }
        }
        self.frames_written += frames as u64;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn failed_writes(&self) -> u64 {
        self.failed_writes
    }

    /// Flushes and closes the file, patching the header with the final length.
    pub fn finalize(self) -> Result<FinishedBounce, hound::Error> {
        let Self {
            path,
            writer,
            frames_written,
            failed_writes,
            ..
        } = self;
        writer.finalize()?;
        Ok(FinishedBounce {
            path,
            frames: frames_written,
            failed_writes,
            generation: 0,
        })
    }
}

/// A closed bounce file: the process-wide "last bounce".
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedBounce {
    pub path: PathBuf,
    pub frames: u64,
    pub failed_writes: u64,
    /// Increases with every finished bounce; identifies the recording for caching.
    pub generation: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RecordingState {
    Idle,
    Recording,
    /// Stop requested; waiting for the audio thread to hand the writer back.
    Stopping,
}

/// Control-side lifecycle of bounce recording sessions.
#[derive(Debug)]
pub struct BounceRecorder {
    output_path: PathBuf,
    state: RecordingState,
    last_bounce: Option<FinishedBounce>,
    generation: u64,
}

impl BounceRecorder {
    pub fn new(output_path: PathBuf) -> Self {
        Self {
            output_path,
            state: RecordingState::Idle,
            last_bounce: None,
            generation: 0,
        }
    }

    pub fn state(&self) -> &RecordingState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state != RecordingState::Idle
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn last_bounce(&self) -> Option<&FinishedBounce> {
        self.last_bounce.as_ref()
    }

    /// Opens a new session, overwriting any previous bounce file.
    pub fn start(&mut self, channels: usize, sample_rate: u32) -> Result<BounceWriter, EngineError> {
        if self.is_active() {
            return Err(EngineError::RecordingInProgress);
        }

        let writer = BounceWriter::create(&self.output_path, channels, sample_rate)?;
        self.last_bounce = None;
        self.state = RecordingState::Recording;
        log::info!("Bounce recording started: {}", self.output_path.display());
        Ok(writer)
    }

    /// Marks the session as stopping. The writer comes back via [`complete`](Self::complete).
    pub fn request_stop(&mut self) -> Result<(), EngineError> {
        if self.state != RecordingState::Recording {
            return Err(EngineError::NotRecording);
        }
        self.state = RecordingState::Stopping;
        Ok(())
    }

    /// Finalizes a writer handed back by the audio thread.
    pub fn complete(&mut self, writer: BounceWriter) -> Result<&FinishedBounce, EngineError> {
        self.state = RecordingState::Idle;
        let mut finished = writer.finalize()?;
        if finished.failed_writes > 0 {
            log::warn!(
                "Bounce finished with {} skipped buffers",
                finished.failed_writes
            );
        }

        self.generation += 1;
        finished.generation = self.generation;
        log::info!(
            "Bounce recording finished: {} frames in {}",
            finished.frames,
            finished.path.display()
        );
        Ok(&*self.last_bounce.insert(finished))
    }

    /// Forgets the last bounce without touching the file.
    pub fn forget(&mut self) {
        self.last_bounce = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writer_counts_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");

        let mut writer = BounceWriter::create(&path, 2, 44_100).unwrap();
        writer.write_interleaved(&[0.1; 2048]);
        writer.write_interleaved(&[0.2; 2048]);
        assert_eq!(writer.frames_written(), 2048);

        let finished = writer.finalize().unwrap();
        assert_eq!(finished.frames, 2048);
        assert_eq!(finished.failed_writes, 0);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 2048);
        assert_eq!(reader.spec().channels, 2);
        assert_eq!(reader.spec().sample_format, SampleFormat::Float);
    }

    #[test]
    fn test_writer_drops_partial_frames() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");

        let mut writer = BounceWriter::create(&path, 2, 44_100).unwrap();
        writer.write_interleaved(&[0.5; 5]);
        assert_eq!(writer.frames_written(), 2);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_failed_buffers_are_skipped_and_counted() {
        // Every write reaching /dev/full fails with ENOSPC once the buffer spills.
        let mut writer = BounceWriter::create(Path::new("/dev/full"), 2, 44_100).unwrap();
        const BUFFERS: u64 = 10;
        for _ in 0..BUFFERS {
            writer.write_interleaved(&[0.1; 2 * 256]);
        }

        assert!(writer.failed_writes() > 0);
        assert!(writer.frames_written() < BUFFERS * 256);
        assert_eq!(writer.frames_written() + writer.failed_writes() * 256, BUFFERS * 256);

        // Recording carries on after a failure.
        writer.write_interleaved(&[0.1; 2 * 256]);
        assert_eq!(writer.frames_written() + writer.failed_writes() * 256, (BUFFERS + 1) * 256);
        assert!(writer.finalize().is_err());
    }

    #[test]
    fn test_recorder_lifecycle() {
        let tmp = tempfile::tempdir().unwrap();
        let mut recorder = BounceRecorder::new(tmp.path().join("output.wav"));
        assert!(matches!(recorder.request_stop(), Err(EngineError::NotRecording)));

        let mut writer = recorder.start(1, 44_100).unwrap();
        assert_eq!(recorder.state(), &RecordingState::Recording);
        assert!(matches!(
            recorder.start(1, 44_100),
            Err(EngineError::RecordingInProgress)
        ));

        writer.write_interleaved(&[0.25; 100]);
        recorder.request_stop().unwrap();
        assert_eq!(recorder.state(), &RecordingState::Stopping);

        let finished = recorder.complete(writer).unwrap().clone();
        assert_eq!(finished.frames, 100);
        assert_eq!(finished.generation, 1);
        assert!(!recorder.is_active());
        assert_eq!(recorder.last_bounce(), Some(&finished));
    }

    #[test]
    fn test_new_session_overwrites_previous_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        let mut recorder = BounceRecorder::new(path.clone());

        let mut writer = recorder.start(2, 44_100).unwrap();
        for _ in 0..10 {
            writer.write_interleaved(&[0.3; 2048]);
        }
        recorder.request_stop().unwrap();
        recorder.complete(writer).unwrap();
        let long_len = std::fs::metadata(&path).unwrap().len();

        let mut writer = recorder.start(2, 44_100).unwrap();
        assert!(recorder.last_bounce().is_none());
        writer.write_interleaved(&[0.3; 2048]);
        recorder.request_stop().unwrap();
        let finished = recorder.complete(writer).unwrap().clone();
        assert_eq!(finished.generation, 2);

        let short_len = std::fs::metadata(&path).unwrap().len();
        assert!(short_len < long_len);
        assert_eq!(long_len - short_len, 9 * 2048 * 4);

        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.duration(), 1024);
    }
}
