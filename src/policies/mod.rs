//! Retry policies.
//!
//! ## Contents
//! - [`WaitJitter`] uniform integer-second jitter around a task's base wait
//! - [`RetryPolicy`] jittered waits plus retry/fatal classification
//! - [`Disposition`] outcome of classifying a provider error
//!
//! ## Quick wiring
//! ```text
//! EngineConfig { jitter_spread_secs, min_wait_secs }
//!      └─► RetryPolicy { jitter: WaitJitter }
//!           └─► core::executor::TaskExecutor uses:
//!                - wait(task.wait_time) before every attempt
//!                - classify(&err) after every failed attempt
//! ```
//!
//! ## Defaults
//! - spread 5 s, floor 1 s: a 30 s base waits 25..=35 s.

mod jitter;
mod retry;

pub use jitter::WaitJitter;
pub use retry::{Disposition, RetryPolicy};
