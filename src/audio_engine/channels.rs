use crate::audio_engine::errors::SampleLoadError;

/// Maps interleaved samples from one channel layout to another.
///
/// Supported conversions:
/// - same channel count: returned unchanged
/// - mono → N channels: the mono signal is copied to every channel
/// - N channels → mono: each frame is averaged
///
/// Anything else is rejected with [`SampleLoadError::UnsupportedChannels`].
pub fn map_channels(
    samples: Vec<f32>,
    file_channels: usize,
    output_channels: usize,
) -> Result<Vec<f32>, SampleLoadError> {
    if file_channels == output_channels {
        return Ok(samples);
    }

    let unsupported = SampleLoadError::UnsupportedChannels {
        file_channels,
        output_channels,
    };
    if file_channels == 0 || output_channels == 0 {
        return Err(unsupported);
    }

    if file_channels == 1 {
        let mut out = Vec::with_capacity(samples.len() * output_channels);
        for s in samples {
            out.extend(std::iter::repeat_n(s, output_channels));
        }
        return Ok(out);
    }

    if output_channels == 1 {
        let scale = 1.0 / file_channels as f32;
        return Ok(samples
            .chunks_exact(file_channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect());
    }

    Err(unsupported)
}

/// Splits interleaved samples into one `Vec` per channel.
pub fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    if channels == 0 {
        return Vec::new();
    }

    let frames = samples.len() / channels;
    let mut planes: Vec<Vec<f32>> = (0..channels).map(|_| Vec::with_capacity(frames)).collect();
    for frame in samples.chunks_exact(channels) {
        for (plane, &s) in planes.iter_mut().zip(frame) {
            plane.push(s);
        }
    }
    planes
}

/// Interleaves per-channel planes, truncating to the shortest plane.
pub fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

/// Iterates channel 0 of an interleaved buffer.
pub fn first_channel(samples: &[f32], channels: usize) -> impl Iterator<Item = f32> + '_ {
    samples.iter().step_by(channels.max(1)).copied()
}
