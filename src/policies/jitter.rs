//! # Jittered inter-attempt waits.
//!
//! [`WaitJitter`] spreads attempts of many tasks with the same base wait so
//! they do not hit the provider in lockstep. A base of `b` seconds becomes a
//! uniform integer number of seconds in `[max(b - spread, floor), b + spread]`.

use std::time::Duration;

use rand::Rng;

/// Uniform integer-second jitter around a base wait.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WaitJitter {
    /// Seconds added to / subtracted from the base.
    pub spread_secs: u64,
    /// Lowest wait ever produced, in seconds.
    pub floor_secs: u64,
}

impl Default for WaitJitter {
    /// ±5 s with a 1 s floor.
    fn default() -> Self {
        Self {
            spread_secs: 5,
            floor_secs: 1,
        }
    }
}

impl WaitJitter {
    /// Inclusive bounds, in seconds, of waits sampled for `base_secs`.
    pub fn bounds(&self, base_secs: u64) -> (u64, u64) {
        let lower = base_secs
            .saturating_sub(self.spread_secs)
            .max(self.floor_secs);
        let upper = base_secs.saturating_add(self.spread_secs).max(lower);
        (lower, upper)
    }

    /// Samples one wait for `base_secs`.
    pub fn sample(&self, base_secs: u64) -> Duration {
        let (lower, upper) = self.bounds(base_secs);
        let secs = if lower == upper {
            lower
        } else {
            rand::rng().random_range(lower..=upper)
        };
        Duration::from_secs(secs)
    }
}
