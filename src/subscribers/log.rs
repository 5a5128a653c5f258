//! # LogWriter: renders runtime events through `tracing`.
//!
//! Lifecycle noise (attempt starts, waits) goes to `debug`, progress and
//! state changes to `info`, retryable failures and subscriber problems to
//! `warn`, terminal failures to `error`.

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.map(|t| t.0);
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::TaskStarted => info!(task, seq = e.seq, "task started"),
            EventKind::TaskRecovered => info!(task, seq = e.seq, "task recovered"),
            EventKind::AttemptStarting => debug!(task, attempt = e.attempt, "attempt starting"),
            EventKind::AttemptRetryable => {
                warn!(task, attempt = e.attempt, reason, "attempt failed, will retry")
            }
            EventKind::InstanceProvisioned => {
                let (current, target) = e.progress.unwrap_or_default();
                info!(task, attempt = e.attempt, current, target, "instance provisioned")
            }
            EventKind::WaitScheduled => debug!(task, delay_ms = e.delay_ms, "waiting"),
            EventKind::TaskSucceeded => info!(task, "task succeeded"),
            EventKind::TaskFailed => error!(task, reason, "task failed"),
            EventKind::TaskStopped => info!(task, "task stopped"),
            EventKind::TaskRemoved => debug!(task, "execution handle removed"),
            EventKind::ExecutorPanicked => error!(task, reason, "executor panicked"),
            EventKind::NoticeReceived => info!(reason, "stock notice received"),
            EventKind::NoticeIgnored => debug!(reason, "stock notice ignored"),
            EventKind::TriggerSubscribed => info!(reason, "reactive trigger subscribed"),
            EventKind::TriggerUnsubscribed => info!("reactive trigger unsubscribed"),
            EventKind::ShutdownRequested => info!("shutdown requested"),
            EventKind::AllStoppedWithin => info!("all executors stopped within grace"),
            EventKind::GraceExceeded => error!(reason, "shutdown grace exceeded"),
            EventKind::SubscriberOverflow => {
                warn!(subscriber = e.subscriber, reason, "subscriber dropped event")
            }
            EventKind::SubscriberPanicked => {
                error!(subscriber = e.subscriber, reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "log-writer"
    }
}
