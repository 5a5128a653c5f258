//! # capgrab
//!
//! **capgrab** is a task execution engine for grabbing scarce cloud capacity.
//!
//! A grab task asks for `target_count` instances of one shape in one
//! availability domain. While the task runs, its executor keeps launching,
//! waiting a jittered interval between attempts, until the target is reached
//! or the provider returns an error that retrying cannot fix. Tasks can be
//! started by hand, re-admitted after a restart, or started by stock notices
//! arriving on a pub/sub channel.
//!
//! ## Architecture
//! ```text
//!   management layer (HTTP, CLI)        stock notices (pub/sub)
//!              │                                 │
//!              ▼                                 ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Engine (composition root)                                        │
//! │  - TaskRegistry   (single-flight start/stop, supervised exits)    │
//! │  - ReactiveTrigger(notice ─► matching stopped tasks ─► start)     │
//! │  - StartupRecovery(persisted `running` ─► start)                  │
//! │  - Bus + SubscriberSet (event fan-out)                            │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐
//!  │ TaskExecutor │  │ TaskExecutor │  │ TaskExecutor │   one per running task
//!  │ (retry loop) │  │ (retry loop) │  │ (retry loop) │
//!  └──────┬───────┘  └──────┬───────┘  └──────┬───────┘
//!         ▼                 ▼                 ▼
//!   ProviderClient     TaskStore (status, counts, instances, task log)
//! ```
//!
//! ### Executor loop
//! ```text
//! wait(jitter(wait_time))
//! loop {
//!   ├─► cancelled or persisted status != running ─► exit
//!   ├─► current_count >= target_count            ─► success, exit
//!   ├─► launch ─► poll until RUNNING ─► read public ip
//!   │       ├─ Ok        ─► record instance, count += 1
//!   │       ├─ retryable ─► INFO log (capacity, throttling)
//!   │       └─ fatal     ─► ERROR log, failed, exit
//!   └─► wait(jitter(wait_time))
//! }
//! ```
//!
//! ## Features
//! | Area              | Description                                              | Key types / traits                         |
//! |-------------------|----------------------------------------------------------|--------------------------------------------|
//! | **Engine**        | Task operations, auto grab toggle, graceful shutdown.    | [`Engine`], [`EngineBuilder`]              |
//! | **Execution**     | Single-flight executors, stop, crash recovery.           | [`TaskRegistry`], [`StartupRecovery`]      |
//! | **Provider**      | Launch, poll and address instances of a cloud provider.  | [`ProviderClient`], [`ProviderConnector`]  |
//! | **Persistence**   | Tasks, task logs, profiles and settings.                 | [`TaskStore`], [`MemoryStore`]             |
//! | **Trigger**       | Start tasks on stock notices.                            | [`ReactiveTrigger`], [`EventSource`]       |
//! | **Policies**      | Jittered waits and error classification.                 | [`RetryPolicy`], [`WaitJitter`]            |
//! | **Subscriber API**| Observe runtime events.                                  | [`Subscribe`], [`Event`]                   |
//! | **Configuration** | Engine settings loadable from TOML.                      | [`EngineConfig`]                           |
//!
//! ## Optional features
//! - `logging`: exports the built-in [`LogWriter`] subscriber (enabled by default).
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use capgrab::{
//!     Engine, EngineConfig, MemoryStore, NewTask, ProfileId, ProviderProfile,
//!     SimulatedProvider, StaticConnector, TaskStatus,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(MemoryStore::new());
//!     store.put_profile(ProviderProfile::new(ProfileId(1), "main", "ap-tokyo-1")).await;
//!
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn capgrab::Subscribe>> = vec![Arc::new(capgrab::LogWriter)];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn capgrab::Subscribe>> = Vec::new();
//!
//!     let engine = Engine::builder(EngineConfig::default())
//!         .store(store)
//!         .connector(Arc::new(StaticConnector::new(Arc::new(SimulatedProvider::new()))))
//!         .subscribers(subs)
//!         .build()?;
//!     engine.init().await?;
//!
//!     let task = engine
//!         .create_task(NewTask::new(ProfileId(1), "VM.Standard.A1.Flex", "AD-1", "ocid1.image.x"))
//!         .await?;
//!     engine.start_task(task.id).await?;
//!     assert_eq!(engine.task(task.id).await?.status, TaskStatus::Running);
//!
//!     engine.stop_task(task.id).await?;
//!     assert_eq!(engine.task(task.id).await?.status, TaskStatus::Stopped);
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod policies;
mod provider;
mod store;
mod subscribers;
mod tasks;
mod trigger;

// ---- Public re-exports ----

pub use core::{
    Engine, EngineBuilder, EngineConfig, RecoveryReport, StartOutcome, StartReason,
    StartupRecovery, StopOutcome, TaskRegistry,
};
pub use error::{
    ConfigError, GrabError, ProviderError, ProviderErrorKind, RuntimeError, SourceError,
    StoreError,
};
pub use events::{Bus, Event, EventKind};
pub use policies::{Disposition, RetryPolicy, WaitJitter};
pub use provider::{
    InstanceRef, LaunchSpec, LifecycleState, PollPolicy, ProviderClient, ProviderConnector,
    SimulatedProvider, StaticConnector,
};
pub use store::{MemoryStore, TaskStore};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{
    AuthType, GlobalSettings, GrabTask, InstanceResult, LaunchMetadata, LogLevel, NewTask,
    ProfileId, ProviderCredentials, ProviderProfile, ShapeConfig, TaskId, TaskLogEntry,
    TaskStatus, generate_password,
};
pub use trigger::{
    BroadcastSource, CpuShapeMap, EventSource, NoticeReport, ReactiveTrigger, StockNotice,
};

// Optional: expose the built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
