//! # TaskExecutor: the retry loop of one grab task.
//!
//! ```text
//! run()
//!   ├─► load task + profile, connect provider
//!   ├─► satisfied already? ─► persist success, exit
//!   ├─► wait(initial jitter) ──────────────── cancelled ─► exit
//!   └─► loop {
//!         ├─► cancelled? ─► exit (no status write)
//!         ├─► re-read task; status != running ─► exit (no status write)
//!         ├─► satisfied? ─► persist success, exit
//!         ├─► provision_once()
//!         │     ├─ Ok      ─► append result, increment, log SUCCESS
//!         │     ├─ Retry   ─► log INFO with reason
//!         │     └─ Fatal   ─► log ERROR, persist failed, exit
//!         └─► wait(jitter) ───────────────── cancelled ─► exit
//!       }
//! ```
//!
//! ## Rules
//! - Attempts are sequential; the persisted record is re-read before each one.
//! - Cancellation is observed at the loop head and during waits only.
//! - The executor never writes `stopped`; whoever requested the stop does.
//! - Store failures are returned as errors; the registry turns them into `failed`.
//! - Once the target is reached the executor finishes without a further wait.

use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::core::attempt::provision_once;
use crate::error::{GrabError, StoreError};
use crate::events::{Bus, Event, EventKind};
use crate::policies::{Disposition, RetryPolicy};
use crate::provider::{PollPolicy, ProviderConnector};
use crate::store::TaskStore;
use crate::tasks::{GrabTask, InstanceResult, LogLevel, TaskId, TaskStatus};

/// Settings shared by every executor of an engine.
#[derive(Clone, Copy, Debug)]
pub(crate) struct ExecutorParams {
    pub policy: RetryPolicy,
    pub poll: PollPolicy,
    pub password_length: usize,
}

/// How an executor left its loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ExecutorExit {
    /// Target reached; `success` persisted.
    Succeeded,
    /// Fatal provider error; `failed` persisted.
    Failed,
    /// Cancellation observed; status untouched.
    Cancelled,
    /// Persisted status was no longer `running`; status untouched.
    Halted(TaskStatus),
}

pub(crate) struct TaskExecutor {
    pub id: TaskId,
    pub store: Arc<dyn TaskStore>,
    pub connector: Arc<dyn ProviderConnector>,
    pub params: ExecutorParams,
    pub bus: Bus,
}

impl TaskExecutor {
    pub async fn run(self, cancel: CancellationToken) -> Result<ExecutorExit, GrabError> {
        let task = self.load().await?;
        let profile = self
            .store
            .load_profile(task.profile_id)
            .await?
            .ok_or(GrabError::ProfileNotFound(task.profile_id))?;
        let client = self.connector.connect(&profile)?;

        if task.is_satisfied() {
            return self.succeed(&task).await;
        }

        let wait = self.params.policy.wait(task.wait_time);
        self.log(
            LogLevel::Info,
            format!("waiting {}s before first attempt", wait.as_secs()),
        )
        .await?;
        if !self.pause(wait, &cancel).await {
            return Ok(ExecutorExit::Cancelled);
        }

        let mut attempt: u32 = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(ExecutorExit::Cancelled);
            }
            let task = self.load().await?;
            if task.status != TaskStatus::Running {
                debug!(task_id = %self.id, status = %task.status, "status changed under executor");
                return Ok(ExecutorExit::Halted(task.status));
            }
            if task.is_satisfied() {
                return self.succeed(&task).await;
            }

            attempt = attempt.saturating_add(1);
            self.bus.publish(
                Event::new(EventKind::AttemptStarting)
                    .with_task(self.id)
                    .with_attempt(attempt),
            );

            let outcome = provision_once(
                client.as_ref(),
                &task,
                self.params.poll,
                self.params.password_length,
            )
            .await;

            let wait = self.params.policy.wait(task.wait_time);
            match outcome {
                Ok(result) => {
                    let current = self.record(&task, attempt, result).await?;
                    if current >= task.target_count {
                        continue;
                    }
                }
                Err(err) => match self.params.policy.classify(&err) {
                    Disposition::Retry => {
                        self.log(
                            LogLevel::Info,
                            format!("{err}, retrying in {}s", wait.as_secs()),
                        )
                        .await?;
                        self.bus.publish(
                            Event::new(EventKind::AttemptRetryable)
                                .with_task(self.id)
                                .with_attempt(attempt)
                                .with_reason(err.message.as_str()),
                        );
                    }
                    Disposition::Fatal => {
                        self.log(LogLevel::Error, format!("provisioning failed: {err}"))
                            .await?;
                        self.store.update_status(self.id, TaskStatus::Failed).await?;
                        self.bus.publish(
                            Event::new(EventKind::TaskFailed)
                                .with_task(self.id)
                                .with_attempt(attempt)
                                .with_reason(err.to_string()),
                        );
                        return Ok(ExecutorExit::Failed);
                    }
                },
            }

            if !self.pause(wait, &cancel).await {
                return Ok(ExecutorExit::Cancelled);
            }
        }
    }

    async fn load(&self) -> Result<GrabTask, GrabError> {
        self.store
            .load(self.id)
            .await?
            .ok_or(GrabError::NotFound(self.id))
    }

    async fn log(&self, level: LogLevel, message: String) -> Result<(), StoreError> {
        self.store.append_log(self.id, level, message).await
    }

    /// Persists one provisioned instance and returns the new count.
    async fn record(
        &self,
        task: &GrabTask,
        attempt: u32,
        result: InstanceResult,
    ) -> Result<u32, GrabError> {
        let instance_id = result.instance_id.clone();
        let address = result.public_ip.clone().unwrap_or_else(|| "no public ip".into());
        self.store.append_instance_result(self.id, result).await?;
        let current = self.store.increment_count(self.id).await?;
        self.log(
            LogLevel::Success,
            format!(
                "provisioned instance {current}/{}: {instance_id} ({address})",
                task.target_count
            ),
        )
        .await?;
        self.bus.publish(
            Event::new(EventKind::InstanceProvisioned)
                .with_task(self.id)
                .with_attempt(attempt)
                .with_progress(current, task.target_count),
        );
        Ok(current)
    }

    async fn succeed(&self, task: &GrabTask) -> Result<ExecutorExit, GrabError> {
        self.store.update_status(self.id, TaskStatus::Success).await?;
        self.log(
            LogLevel::Success,
            format!(
                "task completed: {}/{} instances provisioned",
                task.current_count, task.target_count
            ),
        )
        .await?;
        self.bus
            .publish(Event::new(EventKind::TaskSucceeded).with_task(self.id));
        Ok(ExecutorExit::Succeeded)
    }

    /// Sleeps for `wait`; returns `false` if cancelled first.
    async fn pause(&self, wait: Duration, cancel: &CancellationToken) -> bool {
        self.bus.publish(
            Event::new(EventKind::WaitScheduled)
                .with_task(self.id)
                .with_delay(wait),
        );
        select! {
            _ = time::sleep(wait) => true,
            _ = cancel.cancelled() => false,
        }
    }
}
