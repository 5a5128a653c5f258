//! # Task registry: single-flight execution control.
//!
//! The registry owns one [`Execution`] per active task id and is the only
//! component that spawns executors.
//!
//! ```text
//! start(id) ──lock──► AlreadyRunning? ─► load ─► status=running ─► log ─► insert ─► spawn ─unlock─►
//!                                                                                     │
//!                               supervise(): executor.run().catch_unwind() ◄──────────┘
//!                                    └─► settle(): terminal writes ─► remove handle ─► done.cancel()
//!
//! stop(id) ─► flag stop ─► cancel ─► await done ─► StopOutcome
//! ```
//!
//! ## Rules
//! - Check-and-insert in `start` happens under one lock: concurrent starts of
//!   one id spawn exactly one executor.
//! - Terminal writes happen in the supervising task before the handle is
//!   removed, so a later `start` never races a late `stopped` write.
//! - Executor errors and panics always end with status `failed`, an ERROR log
//!   entry and the handle removed.
//! - `shutdown` cancels every executor and does not touch persisted status.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use futures::FutureExt;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::executor::{ExecutorExit, ExecutorParams, TaskExecutor};
use crate::error::{GrabError, StoreError};
use crate::events::{Bus, Event, EventKind};
use crate::provider::ProviderConnector;
use crate::store::TaskStore;
use crate::subscribers::panic_message;
use crate::tasks::{LogLevel, TaskId, TaskStatus};
use crate::trigger::StockNotice;

/// Why a task is being started; only changes the log line and event kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StartReason {
    Manual,
    Notice(StockNotice),
    Recovery,
}

/// Result of a successful `start`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StartOutcome {
    /// Executor spawned for a task without progress.
    Started,
    /// Executor spawned for a task that already holds `current` instances.
    Resumed { current: u32, target: u32 },
}

/// Result of a successful `stop`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// Executor cancelled; `stopped` persisted.
    Stopped,
    /// No executor was running; nothing changed.
    AlreadyIdle,
    /// Executor reached a terminal status before it observed the stop.
    AlreadyFinished(TaskStatus),
}

/// How an execution ended, as seen by `stop`.
#[derive(Clone, Copy, Debug)]
enum Ending {
    Stopped,
    Finished(TaskStatus),
    Detached,
}

/// In-memory handle of one running executor.
struct Execution {
    cancel: CancellationToken,
    done: CancellationToken,
    stop_requested: AtomicBool,
    ending: OnceLock<Ending>,
    write_error: std::sync::Mutex<Option<StoreError>>,
}

impl Execution {
    fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            done: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            ending: OnceLock::new(),
            write_error: std::sync::Mutex::new(None),
        }
    }

    fn take_write_error(&self) -> Option<StoreError> {
        self.write_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
    }

    fn set_write_error(&self, err: StoreError) {
        let mut slot = self
            .write_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slot.get_or_insert(err);
    }
}

/// Registry of active executions.
pub struct TaskRegistry {
    executions: Mutex<HashMap<TaskId, Arc<Execution>>>,
    store: Arc<dyn TaskStore>,
    connector: Arc<dyn ProviderConnector>,
    params: ExecutorParams,
    bus: Bus,
    runtime_token: CancellationToken,
}

impl TaskRegistry {
    pub(crate) fn new(
        store: Arc<dyn TaskStore>,
        connector: Arc<dyn ProviderConnector>,
        params: ExecutorParams,
        bus: Bus,
        runtime_token: CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            executions: Mutex::new(HashMap::new()),
            store,
            connector,
            params,
            bus,
            runtime_token,
        })
    }

    /// Starts an executor for `id`.
    ///
    /// # Errors
    /// - [`GrabError::AlreadyRunning`] if an executor is alive for `id`
    /// - [`GrabError::NotFound`] if the store has no such task
    /// - [`GrabError::ShuttingDown`] after [`shutdown`](Self::shutdown)
    /// - [`GrabError::Store`] if the initial writes fail; the previous status
    ///   is restored and no executor is spawned
    pub async fn start(self: &Arc<Self>, id: TaskId) -> Result<StartOutcome, GrabError> {
        self.start_with(id, StartReason::Manual).await
    }

    /// Like [`start`](Self::start), recording why the task was started.
    pub async fn start_with(
        self: &Arc<Self>,
        id: TaskId,
        reason: StartReason,
    ) -> Result<StartOutcome, GrabError> {
        let mut executions = self.executions.lock().await;
        if self.runtime_token.is_cancelled() {
            return Err(GrabError::ShuttingDown);
        }
        if executions.contains_key(&id) {
            return Err(GrabError::AlreadyRunning(id));
        }
        let task = self.store.load(id).await?.ok_or(GrabError::NotFound(id))?;

        self.store.update_status(id, TaskStatus::Running).await?;
        let outcome = if task.current_count > 0 {
            StartOutcome::Resumed {
                current: task.current_count,
                target: task.target_count,
            }
        } else {
            StartOutcome::Started
        };
        if let Err(err) = self
            .store
            .append_log(id, LogLevel::Info, start_message(&reason, outcome))
            .await
        {
            // no executor will own the task; restore what was persisted before
            if let Err(restore) = self.store.update_status(id, task.status).await {
                warn!(task_id = %id, error = %restore, "failed to restore status after aborted start");
            }
            return Err(err.into());
        }

        let execution = Arc::new(Execution::new(self.runtime_token.child_token()));
        executions.insert(id, Arc::clone(&execution));

        let executor = TaskExecutor {
            id,
            store: Arc::clone(&self.store),
            connector: Arc::clone(&self.connector),
            params: self.params,
            bus: self.bus.clone(),
        };
        let me = Arc::clone(self);
        tokio::spawn(async move { me.supervise(id, execution, executor).await });
        drop(executions);

        let kind = match reason {
            StartReason::Recovery => EventKind::TaskRecovered,
            StartReason::Manual | StartReason::Notice(_) => EventKind::TaskStarted,
        };
        self.bus.publish(Event::new(kind).with_task(id));
        Ok(outcome)
    }

    /// Stops the executor of `id` and waits for it to exit.
    ///
    /// Concurrent calls all wait for the same exit; only one of them receives
    /// a write error, if any occurred.
    ///
    /// # Errors
    /// - [`GrabError::NotFound`] if the task is unknown
    /// - [`GrabError::Store`] if writing `stopped` failed (the handle is removed regardless)
    pub async fn stop(&self, id: TaskId) -> Result<StopOutcome, GrabError> {
        let execution = self.executions.lock().await.get(&id).cloned();
        let Some(execution) = execution else {
            return match self.store.load(id).await? {
                Some(_) => Ok(StopOutcome::AlreadyIdle),
                None => Err(GrabError::NotFound(id)),
            };
        };

        execution.stop_requested.store(true, Ordering::SeqCst);
        execution.cancel.cancel();
        execution.done.cancelled().await;

        if let Some(err) = execution.take_write_error() {
            return Err(err.into());
        }
        Ok(match execution.ending.get() {
            Some(Ending::Finished(status)) => StopOutcome::AlreadyFinished(*status),
            Some(Ending::Stopped) | Some(Ending::Detached) | None => StopOutcome::Stopped,
        })
    }

    /// Active task ids, sorted.
    pub async fn active(&self) -> Vec<TaskId> {
        let mut ids: Vec<TaskId> = self.executions.lock().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn is_active(&self, id: TaskId) -> bool {
        self.executions.lock().await.contains_key(&id)
    }

    /// Cancels every executor and waits until all of them exited.
    ///
    /// Persisted statuses are left as they are, so running tasks are
    /// recovered on the next start. Later `start` calls fail with
    /// [`GrabError::ShuttingDown`].
    pub async fn shutdown(&self) {
        let executions: Vec<Arc<Execution>> = {
            let executions = self.executions.lock().await;
            self.runtime_token.cancel();
            executions.values().cloned().collect()
        };
        for execution in executions {
            execution.done.cancelled().await;
        }
    }

    async fn supervise(self: Arc<Self>, id: TaskId, execution: Arc<Execution>, executor: TaskExecutor) {
        let result = AssertUnwindSafe(executor.run(execution.cancel.clone()))
            .catch_unwind()
            .await;

        let ending = match result {
            Ok(Ok(ExecutorExit::Succeeded)) => Ending::Finished(TaskStatus::Success),
            Ok(Ok(ExecutorExit::Failed)) => Ending::Finished(TaskStatus::Failed),
            Ok(Ok(ExecutorExit::Cancelled | ExecutorExit::Halted(_)))
                if execution.stop_requested.load(Ordering::SeqCst) =>
            {
                self.mark_stopped(id, &execution).await
            }
            Ok(Ok(ExecutorExit::Cancelled)) => Ending::Detached,
            Ok(Ok(ExecutorExit::Halted(status))) => Ending::Finished(status),
            Ok(Err(err)) => {
                warn!(task_id = %id, error = %err, label = err.as_label(), "executor failed");
                self.mark_failed(id, &execution, format!("task failed: {err}"))
                    .await;
                self.bus.publish(
                    Event::new(EventKind::TaskFailed)
                        .with_task(id)
                        .with_reason(err.to_string()),
                );
                Ending::Finished(TaskStatus::Failed)
            }
            Err(panic) => {
                let info = panic_message(panic.as_ref());
                warn!(task_id = %id, panic = %info, "executor panicked");
                self.mark_failed(id, &execution, format!("task crashed: {info}"))
                    .await;
                self.bus.publish(
                    Event::new(EventKind::ExecutorPanicked)
                        .with_task(id)
                        .with_reason(info),
                );
                Ending::Finished(TaskStatus::Failed)
            }
        };
        let _ = execution.ending.set(ending);
        self.cleanup(id, &execution).await;
        execution.done.cancel();
    }

    async fn mark_stopped(&self, id: TaskId, execution: &Execution) -> Ending {
        let writes = async {
            self.store.update_status(id, TaskStatus::Stopped).await?;
            self.store
                .append_log(id, LogLevel::Info, "task stopped".to_string())
                .await
        };
        if let Err(err) = writes.await {
            warn!(task_id = %id, error = %err, "failed to persist stop");
            execution.set_write_error(err);
        }
        self.bus
            .publish(Event::new(EventKind::TaskStopped).with_task(id));
        Ending::Stopped
    }

    async fn mark_failed(&self, id: TaskId, execution: &Execution, message: String) {
        let writes = async {
            self.store.update_status(id, TaskStatus::Failed).await?;
            self.store.append_log(id, LogLevel::Error, message).await
        };
        if let Err(err) = writes.await {
            warn!(task_id = %id, error = %err, "failed to persist failure");
            execution.set_write_error(err);
        }
    }

    /// Removes the handle of `execution`; no-op if it is already gone.
    async fn cleanup(&self, id: TaskId, execution: &Arc<Execution>) {
        let mut executions = self.executions.lock().await;
        if executions
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, execution))
        {
            executions.remove(&id);
            drop(executions);
            debug!(task_id = %id, "execution removed");
            self.bus
                .publish(Event::new(EventKind::TaskRemoved).with_task(id));
        }
    }
}

fn start_message(reason: &StartReason, outcome: StartOutcome) -> String {
    let base = match reason {
        StartReason::Manual => "task started".to_string(),
        StartReason::Notice(notice) => format!("task started by stock notice ({notice})"),
        StartReason::Recovery => "task recovered after restart".to_string(),
    };
    match outcome {
        StartOutcome::Started => base,
        StartOutcome::Resumed { current, target } => {
            format!("{base}, resuming at {current}/{target}")
        }
    }
}
