//! Runtime core: execution control and lifecycle.
//!
//! Internal modules:
//! - [`registry`]: single-flight start/stop and supervised completion;
//! - [`executor`]: the retry loop of one task;
//! - [`attempt`]: one provisioning attempt;
//! - [`recovery`]: re-admits persisted `running` tasks;
//! - [`engine`] / [`builder`]: composition root and its builder;
//! - [`config`]: engine configuration;
//! - [`shutdown`]: OS signal handling.
//!
//! ```text
//! Engine ──► TaskRegistry ──spawn──► supervise(TaskExecutor::run)
//!   │              ▲                          │
//!   │              ├── StartupRecovery        ├─► provision_once ─► ProviderClient
//!   │              └── ReactiveTrigger        └─► TaskStore (re-read, logs, counts)
//!   └──► Bus ──► SubscriberSet
//! ```

mod attempt;
mod builder;
mod config;
mod engine;
mod executor;
mod recovery;
mod registry;
mod shutdown;

#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use config::EngineConfig;
pub use engine::Engine;
pub use recovery::{RecoveryReport, StartupRecovery};
pub use registry::{StartOutcome, StartReason, StopOutcome, TaskRegistry};
