//! Poll cadence.

use std::time::Duration;

/// Lowest multiple of the interval a jittered delay may shrink to.
const MIN_DELAY_FACTOR: f64 = 0.1;

/// Interval between session iterations, spread by random jitter so many
/// sessions do not hit the remote API in lockstep.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSchedule {
    interval: Duration,
    jitter_ratio: f64,
}

impl PollSchedule {
    /// `jitter_ratio` is clamped to `0.0..=1.0`.
    pub fn new(interval: Duration, jitter_ratio: f64) -> Self {
        let jitter_ratio = if jitter_ratio.is_finite() {
            jitter_ratio.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            interval,
            jitter_ratio,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn jitter_ratio(&self) -> f64 {
        self.jitter_ratio
    }

    /// Delay before the next iteration, within `interval ± interval * jitter_ratio`
    /// and never below a tenth of the interval.
    pub fn next_delay(&self) -> Duration {
        if self.jitter_ratio == 0.0 {
            return self.interval;
        }
        // Uniform in [-1, 1)
        let spread = rand::random::<f64>() * 2.0 - 1.0;
        let factor = 1.0 + self.jitter_ratio * spread;
        self.interval.mul_f64(factor.max(MIN_DELAY_FACTOR))
    }
}
