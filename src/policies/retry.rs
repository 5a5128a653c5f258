//! # Retry policy of the grab loop.
//!
//! Pure decisions only: how long to wait before the next attempt and whether
//! a provider failure is worth another attempt. The executor applies them.

use std::time::Duration;

use crate::error::ProviderError;
use crate::policies::WaitJitter;

/// What the executor does after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Disposition {
    /// Transient scarcity or throttling; wait and try again.
    Retry,
    /// Terminal failure; mark the task failed.
    Fatal,
}

/// Wait computation and error classification for task executors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryPolicy {
    pub jitter: WaitJitter,
}

impl RetryPolicy {
    pub fn new(jitter: WaitJitter) -> Self {
        Self { jitter }
    }

    /// Jittered wait for a task whose base wait is `base_secs`.
    pub fn wait(&self, base_secs: u64) -> Duration {
        self.jitter.sample(base_secs)
    }

    /// Classifies a provider failure by its kind.
    pub fn classify(&self, err: &ProviderError) -> Disposition {
        if err.is_retryable() {
            Disposition::Retry
        } else {
            Disposition::Fatal
        }
    }
}
