//! # Startup recovery.
//!
//! After a restart the registry is empty while the store may still hold
//! tasks in `running` status. [`StartupRecovery`] re-admits each of them
//! through the registry, so they continue from their persisted counts.

use std::sync::Arc;

use tracing::{info, warn};

use crate::core::registry::{StartReason, TaskRegistry};
use crate::error::GrabError;
use crate::store::TaskStore;
use crate::tasks::{TaskId, TaskStatus};

/// What recovery did with each persisted `running` task.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Tasks whose executor was spawned again.
    pub recovered: Vec<TaskId>,
    /// Tasks that already had a live executor.
    pub skipped: Vec<TaskId>,
    /// Tasks that could not be restarted.
    pub failed: Vec<(TaskId, GrabError)>,
}

impl RecoveryReport {
    /// `true` when every persisted `running` task is active again.
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Re-admits persisted `running` tasks.
pub struct StartupRecovery {
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
}

impl StartupRecovery {
    pub fn new(store: Arc<dyn TaskStore>, registry: Arc<TaskRegistry>) -> Self {
        Self { store, registry }
    }

    /// Starts every `running` task; individual failures are reported, not propagated.
    ///
    /// # Errors
    /// [`GrabError::Store`] if the running tasks cannot be listed.
    pub async fn run(&self) -> Result<RecoveryReport, GrabError> {
        let running = self.store.find_by_status(TaskStatus::Running).await?;
        let mut report = RecoveryReport::default();

        for task in running {
            match self.registry.start_with(task.id, StartReason::Recovery).await {
                Ok(_) => report.recovered.push(task.id),
                Err(GrabError::AlreadyRunning(id)) => report.skipped.push(id),
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "failed to recover task");
                    report.failed.push((task.id, err));
                }
            }
        }

        info!(
            recovered = report.recovered.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "startup recovery finished"
        );
        Ok(report)
    }
}
