//! Signal level measurement for the mix-bus tap and the live input.
//!
//! The audio side reduces each delivered buffer to one log-power value. The visual side
//! ([`LevelMeter`]) runs on its own refresh clock and glides toward the last value it saw.

use std::time::Duration;

use crate::audio_engine::channels::first_channel;
use crate::audio_engine::constants::{LEVEL_FLOOR_DB, METER_GLIDE_MS, METER_REFRESH_MS};

/// Mean squared amplitude, or `None` for an empty buffer.
pub fn mean_square(samples: impl Iterator<Item = f32>) -> Option<f32> {
    let (sum, count) = samples.fold((0.0f64, 0usize), |(sum, count), s| {
        (sum + f64::from(s) * f64::from(s), count + 1)
    });
    if count == 0 {
        return None;
    }
    Some((sum / count as f64) as f32)
}

/// `10 * log10(mean_square)`, floored at [`LEVEL_FLOOR_DB`] for silence.
pub fn power_db(mean_square: f32) -> f32 {
    if !mean_square.is_finite() || mean_square <= 0.0 {
        return LEVEL_FLOOR_DB;
    }
    (10.0 * mean_square.log10()).max(LEVEL_FLOOR_DB)
}

/// Channel-0 power of an interleaved buffer, in dB.
pub fn buffer_power_db(interleaved: &[f32], channels: usize) -> f32 {
    mean_square(first_channel(interleaved, channels))
        .map(power_db)
        .unwrap_or(LEVEL_FLOOR_DB)
}

/// Maps a power value to the indicator's vertical scale factor.
pub fn display_scale(power_db: f32) -> f32 {
    (power_db + 50.0).max(2.0) / 2.0
}

/// Animated level indicator state.
///
/// Fed with [`push`](Self::push) whenever a level sample arrives and advanced with
/// [`tick`](Self::tick) from an independent refresh timer.
#[derive(Debug, Clone)]
pub struct LevelMeter {
    from: f32,
    target: f32,
    displayed: f32,
    elapsed: Duration,
    glide: Duration,
}

impl Default for LevelMeter {
    fn default() -> Self {
        Self::new(Duration::from_millis(METER_GLIDE_MS))
    }
}

impl LevelMeter {
    pub fn new(glide: Duration) -> Self {
        let rest = display_scale(LEVEL_FLOOR_DB);
        Self {
            from: rest,
            target: rest,
            displayed: rest,
            elapsed: glide,
            glide,
        }
    }

    pub fn push(&mut self, power_db: f32) {
        self.from = self.displayed;
        self.target = display_scale(power_db);
        self.elapsed = Duration::ZERO;
    }

    pub fn tick(&mut self, dt: Duration) -> f32 {
        self.elapsed = (self.elapsed + dt).min(self.glide);
        let t = if self.glide.is_zero() {
            1.0
        } else {
            self.elapsed.as_secs_f32() / self.glide.as_secs_f32()
        };
        self.displayed = self.from + (self.target - self.from) * t;
        self.displayed
    }

    /// Advances by one refresh period of the meter timer.
    pub fn step(&mut self) -> f32 {
        self.tick(Duration::from_millis(METER_REFRESH_MS))
    }

    pub fn displayed(&self) -> f32 {
        self.displayed
    }
}
