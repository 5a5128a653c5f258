//! # Persistent task storage.
//!
//! [`TaskStore`] is the only persistent source of truth for task status and
//! progress. The engine never trusts in-memory copies of a task when deciding
//! whether to continue: executors re-read the record before every attempt.
//!
//! ## Rules
//! - Log entries are append-only and returned newest first.
//! - Instance results are appended, never overwritten.
//! - `increment_count` refuses to move `current_count` past `target_count`.
//! - Deleting a task cascades to its log entries.
//!
//! [`MemoryStore`] is the bundled implementation (single process, no durability).

mod memory;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::tasks::{
    GlobalSettings, GrabTask, InstanceResult, LogLevel, NewTask, ProfileId, ProviderProfile,
    TaskId, TaskLogEntry, TaskStatus,
};

pub use memory::MemoryStore;

/// Durable storage of tasks, task logs, provider profiles and global settings.
#[async_trait]
pub trait TaskStore: Send + Sync + 'static {
    /// Persists a new task in `stopped` status and returns the stored record.
    async fn insert(&self, task: NewTask) -> Result<GrabTask, StoreError>;

    /// Loads one task.
    async fn load(&self, id: TaskId) -> Result<Option<GrabTask>, StoreError>;

    /// Lists every task, newest first.
    async fn list(&self) -> Result<Vec<GrabTask>, StoreError>;

    /// Lists tasks with the given status, oldest first.
    async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<GrabTask>, StoreError>;

    /// Overwrites the status field.
    async fn update_status(&self, id: TaskId, status: TaskStatus) -> Result<(), StoreError>;

    /// Increments `current_count` and returns the new value.
    async fn increment_count(&self, id: TaskId) -> Result<u32, StoreError>;

    /// Appends one instance result to the task's accumulated results.
    async fn append_instance_result(
        &self,
        id: TaskId,
        result: InstanceResult,
    ) -> Result<(), StoreError>;

    /// Deletes a task and its logs. Returns `false` if it did not exist.
    async fn delete(&self, id: TaskId) -> Result<bool, StoreError>;

    /// Appends a log entry.
    async fn append_log(
        &self,
        id: TaskId,
        level: LogLevel,
        message: String,
    ) -> Result<(), StoreError>;

    /// Returns the task's log entries, newest first.
    async fn logs(&self, id: TaskId) -> Result<Vec<TaskLogEntry>, StoreError>;

    /// Loads a provider profile.
    async fn load_profile(&self, id: ProfileId) -> Result<Option<ProviderProfile>, StoreError>;

    /// Loads global settings (defaults when never saved).
    async fn settings(&self) -> Result<GlobalSettings, StoreError>;

    /// Persists global settings.
    async fn save_settings(&self, settings: GlobalSettings) -> Result<(), StoreError>;
}
