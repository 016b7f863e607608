//! Playback progress clock for the last bounce.
//!
//! Modelled as a small state machine: `Idle -> Playing -> (Idle | Finished)`. Time is always
//! passed in by the caller so the clock never reads the system time on its own.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlaybackState {
    Idle,
    Playing { started: Instant, duration: Duration },
    Finished,
}

/// One progress update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressTick {
    /// Linear progress in `[0, 1]`.
    pub fraction: f32,
    /// This tick completed the run.
    pub finished: bool,
}

/// Drives a 0..1 progress value over a recording's duration.
#[derive(Debug, Clone)]
pub struct ProgressClock {
    state: PlaybackState,
}

impl Default for ProgressClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressClock {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        matches!(self.state, PlaybackState::Playing { .. })
    }

    /// Starts a run of `duration_secs` at `now`. Negative or non-finite durations count as zero.
    pub fn start(&mut self, duration_secs: f64, now: Instant) {
        let duration = if duration_secs.is_finite() && duration_secs > 0.0 {
            Duration::from_secs_f64(duration_secs)
        } else {
            Duration::ZERO
        };
        self.state = PlaybackState::Playing {
            started: now,
            duration,
        };
    }

    /// Cancels an active run and returns to `Idle`. Returns whether a run was cancelled.
    pub fn cancel(&mut self) -> bool {
        let was_playing = self.is_playing();
        self.state = PlaybackState::Idle;
        was_playing
    }

    /// Advances the clock. Returns `None` unless a run is active.
    pub fn tick(&mut self, now: Instant) -> Option<ProgressTick> {
        let PlaybackState::Playing { started, duration } = self.state else {
            return None;
        };

        let elapsed = now.saturating_duration_since(started);
        if elapsed >= duration {
            self.state = PlaybackState::Finished;
            return Some(ProgressTick {
                fraction: 1.0,
                finished: true,
            });
        }

        let fraction = (elapsed.as_secs_f64() / duration.as_secs_f64()) as f32;
        Some(ProgressTick {
            fraction: fraction.clamp(0.0, 1.0),
            finished: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_is_linear() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.start(2.0, t0);

        let tick = clock.tick(t0 + Duration::from_millis(500)).unwrap();
        assert!((tick.fraction - 0.25).abs() < 1e-6);
        assert!(!tick.finished);

        let tick = clock.tick(t0 + Duration::from_millis(1500)).unwrap();
        assert!((tick.fraction - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_completion_finishes_once() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.start(1.0, t0);

        let tick = clock.tick(t0 + Duration::from_secs(3)).unwrap();
        assert_eq!(tick.fraction, 1.0);
        assert!(tick.finished);
        assert_eq!(clock.state(), PlaybackState::Finished);
        assert!(clock.tick(t0 + Duration::from_secs(4)).is_none());
    }

    #[test]
    fn test_cancel_returns_to_idle() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        assert!(!clock.cancel());

        clock.start(10.0, t0);
        clock.tick(t0 + Duration::from_secs(1));
        assert!(clock.cancel());
        assert_eq!(clock.state(), PlaybackState::Idle);
        assert!(clock.tick(t0 + Duration::from_secs(2)).is_none());
    }

    #[test]
    fn test_zero_duration_finishes_immediately() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.start(0.0, t0);
        assert!(clock.tick(t0).unwrap().finished);

        clock.start(f64::NAN, t0);
        assert!(clock.tick(t0).unwrap().finished);
    }

    #[test]
    fn test_tick_before_start_time_is_zero() {
        let t0 = Instant::now();
        let mut clock = ProgressClock::new();
        clock.start(1.0, t0 + Duration::from_secs(1));
        assert_eq!(clock.tick(t0).unwrap().fraction, 0.0);
    }
}
