//! Live input (microphone) monitoring.
//!
//! The default input device is opened with its native configuration. Every delivered buffer
//! is appended to a WAV file and reduced to one channel-0 power value, which is pushed to the
//! control domain through a lock-free ring.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use hound::{WavSpec, WavWriter};
use rtrb::{Consumer, Producer, RingBuffer};

use crate::audio_engine::constants::INPUT_LEVEL_RING_CAPACITY;
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::level_monitor::{mean_square, power_db};

type SharedWriter = Arc<Mutex<Option<WavWriter<BufWriter<File>>>>>;

/// A running live-input session.
pub struct InputMonitor {
    stream: Stream,
    writer: SharedWriter,
    levels: Consumer<f32>,
    path: PathBuf,
    channels: u16,
    sample_rate: u32,
}

impl InputMonitor {
    /// Opens the default input device and starts recording to `path`.
    ///
    /// Any device or permission problem is reported as [`EngineError::DeviceUnavailable`].
    pub fn start(path: &Path) -> Result<Self, EngineError> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| EngineError::DeviceUnavailable("no input device found".to_string()))?;
        let supported = device
            .default_input_config()
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        let sample_format = supported.sample_format();
        let config: StreamConfig = supported.config();
        let spec = WavSpec {
            channels: config.channels,
            sample_rate: config.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer: SharedWriter = Arc::new(Mutex::new(Some(WavWriter::create(path, spec)?)));
        let (producer, levels) = RingBuffer::new(INPUT_LEVEL_RING_CAPACITY);

        let stream = match sample_format {
            SampleFormat::F32 => build_input_stream::<f32>(&device, &config, writer.clone(), producer),
            SampleFormat::I16 => build_input_stream::<i16>(&device, &config, writer.clone(), producer),
            SampleFormat::U16 => build_input_stream::<u16>(&device, &config, writer.clone(), producer),
            format => Err(EngineError::DeviceUnavailable(format!(
                "unsupported input sample format {format}"
            ))),
        }?;
        stream
            .play()
            .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))?;

        log::info!(
            "Live input started ({} ch@{} Hz): {}",
            config.channels,
            config.sample_rate,
            path.display()
        );

        Ok(Self {
            stream,
            writer,
            levels,
            path: path.to_path_buf(),
            channels: config.channels,
            sample_rate: config.sample_rate,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Latest input power in dB since the previous poll, if any buffer arrived.
    pub fn poll_level(&mut self) -> Option<f32> {
        let mut latest = None;
        while let Ok(level) = self.levels.pop() {
            latest = Some(level);
        }
        latest
    }

    /// Stops the device, then finalizes the recording and returns its path.
    pub fn stop(self) -> Result<PathBuf, EngineError> {
        let Self {
            stream,
            writer,
            path,
            ..
        } = self;
        // No callback can run once the stream is gone.
        drop(stream);

        let writer = match writer.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(writer) = writer {
            writer.finalize()?;
        }
        log::info!("Live input stopped: {}", path.display());
        Ok(path)
    }
}

fn build_input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    writer: SharedWriter,
    mut levels: Producer<f32>,
) -> Result<Stream, EngineError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    let mut failed = false;

    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                let power = mean_square(
                    data.iter()
                        .step_by(channels.max(1))
                        .map(|s| f32::from_sample(*s)),
                )
                .map(power_db);
                if let Some(power) = power {
                    let _ = levels.push(power);
                }

                // Never wait for the control thread; a contended buffer is skipped.
                let Ok(mut guard) = writer.try_lock() else {
                    return;
                };
                let Some(writer) = guard.as_mut() else {
                    return;
                };
                for sample in data {
                    if let Err(err) = writer.write_sample(f32::from_sample(*sample)) {
                        if !failed {
                            log::warn!("Live input write failed: {err}");
                            failed = true;
                        }
                        return;
                    }
                }
            },
            |err| {
                log::error!("Input stream error: {}", err);
            },
            None,
        )
        .map_err(|e| EngineError::DeviceUnavailable(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_monitor_smoke() {
        // Requires a microphone; skipped when none is present.
        if cpal::default_host().default_input_device().is_none() {
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("Microphone.wav");
        let Ok(monitor) = InputMonitor::start(&path) else {
            return;
        };
        let stopped = monitor.stop().unwrap();
        assert_eq!(stopped, path);
        assert!(hound::WavReader::open(&path).is_ok());
    }

    #[test]
    fn test_missing_directory_is_reported() {
        if cpal::default_host().default_input_device().is_none() {
            return;
        }

        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing").join("Microphone.wav");
        assert!(InputMonitor::start(&path).is_err());
    }
}
