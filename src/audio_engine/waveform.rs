//! Waveform envelope extraction for finished recordings.
//!
//! A recording is decoded in full, then reduced to a fixed number of buckets by picking the
//! sample nearest to each bucket's start index (no averaging) and normalising by the peak
//! absolute amplitude of the whole file.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, Sender, TryRecvError};
use std::thread;

use crate::audio_engine::channels::first_channel;
use crate::audio_engine::errors::WaveformError;
use crate::audio_engine::sample_loader::decode_audio_file;

/// Down-sampled peak envelope of a recording plus its duration.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformEnvelope {
    /// One magnitude per bucket, each in `[0, 1]`.
    pub samples: Vec<f32>,
    /// Total duration in seconds.
    pub duration: f64,
}

/// Reduces channel-0 samples to `buckets` normalised magnitudes.
///
/// `bucket[i] = |sample[i * frames / buckets]| / max|sample|`. A silent or empty input yields
/// an all-zero envelope.
pub fn envelope_from_samples(channel: &[f32], sample_rate: u32, buckets: usize) -> WaveformEnvelope {
    let frames = channel.len();
    let duration = if sample_rate == 0 {
        0.0
    } else {
        frames as f64 / f64::from(sample_rate)
    };

    let max_amplitude = channel.iter().fold(0.0f32, |max, s| max.max(s.abs()));
    if frames == 0 || max_amplitude == 0.0 || !max_amplitude.is_finite() {
        return WaveformEnvelope {
            samples: vec![0.0; buckets],
            duration,
        };
    }

    let samples = (0..buckets)
        .map(|i| {
            let index = (i as u64 * frames as u64 / buckets as u64) as usize;
            (channel[index].abs() / max_amplitude).clamp(0.0, 1.0)
        })
        .collect();

    WaveformEnvelope { samples, duration }
}

/// Decodes a finished recording and extracts its envelope.
pub fn extract_envelope(path: &Path, buckets: usize) -> Result<WaveformEnvelope, WaveformError> {
    let decoded = decode_audio_file(path).map_err(|source| WaveformError::DecodeFailed {
        path: path.to_path_buf(),
        source,
    })?;

    let channel: Vec<f32> = first_channel(&decoded.samples, decoded.channels).collect();
    Ok(envelope_from_samples(&channel, decoded.sample_rate, buckets))
}

/// Outcome of [`WaveformExtractor::request`].
#[derive(Debug, Clone)]
pub enum EnvelopeRequest {
    /// Already extracted for this recording.
    Ready(Arc<WaveformEnvelope>),
    /// A decode was started in the background.
    Started,
    /// A decode for this recording is already running.
    InFlight,
}

/// A finished background extraction.
#[derive(Debug)]
pub struct EnvelopeResult {
    pub generation: u64,
    pub path: PathBuf,
    pub envelope: Result<Arc<WaveformEnvelope>, WaveformError>,
}

struct Job {
    generation: u64,
    path: PathBuf,
    envelope: Result<WaveformEnvelope, WaveformError>,
}

/// Runs extractions on background threads, at most one per recording, and caches results.
///
/// Recordings are identified by their bounce generation, so a new bounce at the same path is
/// never served a stale envelope.
pub struct WaveformExtractor {
    buckets: usize,
    tx: Sender<Job>,
    rx: Receiver<Job>,
    cache: HashMap<u64, Arc<WaveformEnvelope>>,
    in_flight: HashSet<u64>,
}

impl WaveformExtractor {
    pub fn new(buckets: usize) -> Self {
        let (tx, rx) = std::sync::mpsc::channel();
        Self {
            buckets,
            tx,
            rx,
            cache: HashMap::new(),
            in_flight: HashSet::new(),
        }
    }

    pub fn buckets(&self) -> usize {
        self.buckets
    }

    pub fn cached(&self, generation: u64) -> Option<Arc<WaveformEnvelope>> {
        self.cache.get(&generation).cloned()
    }

    pub fn is_in_flight(&self, generation: u64) -> bool {
        self.in_flight.contains(&generation)
    }

    pub fn request(&mut self, generation: u64, path: &Path) -> EnvelopeRequest {
        if let Some(envelope) = self.cached(generation) {
            return EnvelopeRequest::Ready(envelope);
        }
        if !self.in_flight.insert(generation) {
            return EnvelopeRequest::InFlight;
        }

        let tx = self.tx.clone();
        let buckets = self.buckets;
        let path = path.to_path_buf();
        thread::spawn(move || {
            let envelope = extract_envelope(&path, buckets);
            let _ = tx.send(Job {
                generation,
                path,
                envelope,
            });
        });
        EnvelopeRequest::Started
    }

    /// Collects the next finished extraction, if any.
    pub fn try_recv(&mut self) -> Option<EnvelopeResult> {
        match self.rx.try_recv() {
            Ok(job) => Some(self.finish(job)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Blocks until the next finished extraction arrives.
    pub fn recv(&mut self) -> Option<EnvelopeResult> {
        let job = self.rx.recv().ok()?;
        Some(self.finish(job))
    }

    fn finish(&mut self, job: Job) -> EnvelopeResult {
        self.in_flight.remove(&job.generation);
        let envelope = job.envelope.map(|envelope| {
            let envelope = Arc::new(envelope);
            self.cache.insert(job.generation, envelope.clone());
            envelope
        });
        EnvelopeResult {
            generation: job.generation,
            path: job.path,
            envelope,
        }
    }

    /// Drops every cached envelope.
    pub fn invalidate(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::bounce_recorder::BounceWriter;

    fn write_bounce(path: &Path, channels: usize, samples: &[f32]) {
        let mut writer = BounceWriter::create(path, channels, 44_100).unwrap();
        writer.write_interleaved(samples);
        writer.finalize().unwrap();
    }

    #[test]
    fn test_nearest_index_pick() {
        let channel = [0.0, -1.0, 0.5, 0.25, -0.5, 2.0, 1.0, 0.0];
        let envelope = envelope_from_samples(&channel, 4, 4);

        assert_eq!(envelope.samples, vec![0.0, 0.25, 0.25, 0.5]);
        assert!((envelope.duration - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_values_are_normalised() {
        let channel: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.37).sin() * 0.3).collect();
        let envelope = envelope_from_samples(&channel, 44_100, 300);

        assert_eq!(envelope.samples.len(), 300);
        assert!(envelope.samples.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_silence_yields_zero_envelope() {
        let envelope = envelope_from_samples(&[0.0; 512], 44_100, 32);
        assert_eq!(envelope.samples, vec![0.0; 32]);

        let empty = envelope_from_samples(&[], 44_100, 8);
        assert_eq!(empty.samples, vec![0.0; 8]);
        assert_eq!(empty.duration, 0.0);
    }

    #[test]
    fn test_more_buckets_than_frames() {
        let envelope = envelope_from_samples(&[0.5, -1.0], 2, 4);
        assert_eq!(envelope.samples, vec![0.5, 0.5, 1.0, 1.0]);
    }

    #[test]
    fn test_extract_from_recording_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        let samples: Vec<f32> = (0..44_100)
            .flat_map(|i| {
                let s = ((i as f32) * 0.01).sin() * 0.8;
                [s, -s]
            })
            .collect();
        write_bounce(&path, 2, &samples);

        let first = extract_envelope(&path, 300).unwrap();
        let second = extract_envelope(&path, 300).unwrap();

        assert_eq!(first.samples.len(), 300);
        assert!((first.duration - 1.0).abs() < 1e-9);
        assert_eq!(
            first.samples.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            second.samples.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
        assert_eq!(first.duration.to_bits(), second.duration.to_bits());
    }

    #[test]
    fn test_extract_silent_recording() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        write_bounce(&path, 1, &[0.0; 4410]);

        let envelope = extract_envelope(&path, 50).unwrap();
        assert!(envelope.samples.iter().all(|&v| v == 0.0));
        assert!((envelope.duration - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_extract_unparseable_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        std::fs::write(&path, b"not audio").unwrap();

        let result = extract_envelope(&path, 10);
        assert!(matches!(result, Err(WaveformError::DecodeFailed { .. })));
    }

    #[test]
    fn test_extractor_deduplicates_and_caches() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("output.wav");
        write_bounce(&path, 1, &[0.5; 1000]);

        let mut extractor = WaveformExtractor::new(10);
        assert!(matches!(extractor.request(1, &path), EnvelopeRequest::Started));
        assert!(matches!(extractor.request(1, &path), EnvelopeRequest::InFlight));
        assert!(extractor.is_in_flight(1));

        let result = extractor.recv().unwrap();
        assert_eq!(result.generation, 1);
        let envelope = result.envelope.unwrap();
        assert_eq!(envelope.samples, vec![1.0; 10]);
        assert!(!extractor.is_in_flight(1));

        match extractor.request(1, &path) {
            EnvelopeRequest::Ready(cached) => assert!(Arc::ptr_eq(&cached, &envelope)),
            other => panic!("expected cached envelope, got {other:?}"),
        }

        assert!(matches!(extractor.request(2, &path), EnvelopeRequest::Started));
        extractor.recv().unwrap();
        extractor.invalidate();
        assert!(extractor.cached(1).is_none());
        assert!(extractor.cached(2).is_none());
    }

    #[test]
    fn test_extractor_reports_decode_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("missing.wav");

        let mut extractor = WaveformExtractor::new(10);
        extractor.request(7, &path);
        let result = extractor.recv().unwrap();
        assert!(result.envelope.is_err());
        assert!(extractor.cached(7).is_none());
    }
}
