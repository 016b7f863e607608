//! Speed changes by frame-count reduction.
//!
//! A track at speed `f` loops a buffer of `round(frames / f)` frames, filled by nearest-index
//! picks from the original. Tempo and pitch move together; there is no pitch preservation.

use crate::audio_engine::constants::{SPEED_MAX, SPEED_MIN};
use crate::messages::SampleBuffer;

/// Frame count of a buffer rescheduled at `speed`. Never zero for non-empty input.
pub fn frames_for_speed(original_frames: usize, speed: f32) -> usize {
    if original_frames == 0 {
        return 0;
    }

    let speed = if speed.is_finite() {
        speed.clamp(SPEED_MIN, SPEED_MAX)
    } else {
        1.0
    };
    ((original_frames as f64 / speed as f64).round() as usize).max(1)
}

/// Builds the loop buffer for `speed` by nearest-neighbour decimation (or repetition).
pub fn retime_for_speed(sample: &SampleBuffer, speed: f32) -> SampleBuffer {
    let channels = sample.channels;
    let original = sample.frames();
    let target = frames_for_speed(original, speed);
    if target == original {
        return sample.clone();
    }

    let mut out = Vec::with_capacity(target * channels);
    for i in 0..target {
        let src = (i as u64 * original as u64 / target as u64) as usize;
        let base = src * channels;
        out.extend_from_slice(&sample.samples[base..base + channels]);
    }
    SampleBuffer::new(channels, out)
}
