//! Audio file loading and decoding functionality.
//!
//! This module decodes PCM files into in-memory buffers, either at the file's native format
//! (for waveform extraction) or converted to the mix bus format (for playback).

use std::fs::File;
use std::path::Path;

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use symphonia::core::{
    audio::SampleBuffer as SymphoniaSampleBuffer, codecs::DecoderOptions,
    errors::Error as SymphoniaError, formats::FormatOptions, io::MediaSourceStream,
    meta::MetadataOptions, probe::Hint,
};
use symphonia::default::{get_codecs, get_probe};

use crate::audio_engine::channels::{deinterleave, interleave, map_channels};
use crate::audio_engine::errors::SampleLoadError;
use crate::messages::SampleBuffer;

/// A fully decoded file at its native channel count and sample rate.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub channels: usize,
    pub sample_rate: u32,
    /// Interleaved samples.
    pub samples: Vec<f32>,
}

impl DecodedAudio {
    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels
    }
}

/// Decodes an entire audio file in a single pass.
///
/// # Errors
///
/// - File not found or cannot be opened
/// - Audio format not recognized or corrupted
/// - Missing sample rate or channel information
pub fn decode_audio_file(path: &Path) -> Result<DecodedAudio, SampleLoadError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or(SampleLoadError::NoDefaultTrack)?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or(SampleLoadError::MissingSampleRate)?;
    let channels = track
        .codec_params
        .channels
        .ok_or(SampleLoadError::MissingChannels)?
        .count();

    let mut decoder = get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(err))
                if err.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(err) => return Err(SampleLoadError::Decode(err)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let audio_buf = decoder.decode(&packet)?;
        let spec = *audio_buf.spec();
        let duration = audio_buf.capacity() as u64;

        let mut sample_buf = SymphoniaSampleBuffer::<f32>::new(duration, spec);
        sample_buf.copy_interleaved_ref(audio_buf);
        samples.extend_from_slice(sample_buf.samples());
    }

    Ok(DecodedAudio {
        channels,
        sample_rate,
        samples,
    })
}

/// Decodes a file and converts it to the mix bus format.
///
/// Files at a different rate are resampled once here; channel layouts are mapped with
/// [`map_channels`]. Empty files are rejected since they cannot be looped.
pub fn load_sample_buffer(
    path: &Path,
    output_channels: usize,
    output_rate_hz: u32,
) -> Result<SampleBuffer, SampleLoadError> {
    let decoded = decode_audio_file(path)?;
    if decoded.frames() == 0 {
        return Err(SampleLoadError::EmptyAudio);
    }

    let DecodedAudio {
        channels,
        sample_rate,
        samples,
    } = decoded;

    let samples = if sample_rate != output_rate_hz {
        log::debug!(
            "Resampling {} from {} Hz to {} Hz",
            path.display(),
            sample_rate,
            output_rate_hz
        );
        resample(&samples, channels, sample_rate, output_rate_hz)?
    } else {
        samples
    };

    let mapped = map_channels(samples, channels, output_channels)?;
    Ok(SampleBuffer::new(output_channels, mapped))
}

/// Converts interleaved audio between sample rates in one block.
pub fn resample(
    samples: &[f32],
    channels: usize,
    from_hz: u32,
    to_hz: u32,
) -> Result<Vec<f32>, SampleLoadError> {
    let planes = deinterleave(samples, channels);
    let frames = planes.first().map(Vec::len).unwrap_or(0);
    if frames == 0 || from_hz == to_hz {
        return Ok(samples.to_vec());
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(
        to_hz as f64 / from_hz as f64,
        2.0,
        params,
        frames,
        channels,
    )?;
    // The sinc filter delays its output; flush with silence until the whole input is out.
    let delay = resampler.output_delay();
    let expected = (frames as f64 * to_hz as f64 / from_hz as f64).round() as usize;
    let mut out = resampler.process(&planes, None)?;
    while out.first().map(Vec::len).unwrap_or(0) < delay + expected {
        let tail = resampler.process_partial(None::<&[Vec<f32>]>, None)?;
        for (plane, more) in out.iter_mut().zip(tail) {
            plane.extend(more);
        }
    }

    for plane in &mut out {
        plane.drain(..delay);
        plane.truncate(expected);
    }
    Ok(interleave(&out))
}
