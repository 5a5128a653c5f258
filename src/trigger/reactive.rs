//! # ReactiveTrigger: start idle tasks when capacity is announced.
//!
//! ```text
//! EventSource(channel) ──► listener ──► StockNotice::parse
//!                                          ├─ None ─► NoticeIgnored
//!                                          └─ Some ─► stopped tasks
//!                                                      └─► profile.region == notice.region
//!                                                          && shape matches cpu family
//!                                                          └─► registry.start_with(Notice)
//! ```
//!
//! Each matching start is independent; a failing start is logged and does
//! not prevent the others.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast::error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::{StartReason, TaskRegistry};
use crate::error::GrabError;
use crate::events::{Bus, Event, EventKind};
use crate::store::TaskStore;
use crate::tasks::{ProfileId, ProviderProfile, TaskId, TaskStatus};
use crate::trigger::{CpuShapeMap, EventSource, StockNotice};

/// What one notice caused.
#[derive(Debug, Default)]
pub struct NoticeReport {
    /// Parsed notice; `None` when the text carried no region.
    pub notice: Option<StockNotice>,
    /// Tasks started because of the notice.
    pub started: Vec<TaskId>,
    /// Tasks whose start failed, or whose profile could not be read.
    pub failed: Vec<(TaskId, GrabError)>,
}

impl NoticeReport {
    /// Number of tasks the notice acted on, started or failed.
    pub fn matched(&self) -> usize {
        self.started.len() + self.failed.len()
    }
}

struct Listener {
    cancel: CancellationToken,
    join: JoinHandle<()>,
}

/// Subscribes to stock notices and starts matching stopped tasks.
pub struct ReactiveTrigger {
    source: Arc<dyn EventSource>,
    channel: String,
    shapes: CpuShapeMap,
    store: Arc<dyn TaskStore>,
    registry: Arc<TaskRegistry>,
    bus: Bus,
    listener: Mutex<Option<Listener>>,
}

impl ReactiveTrigger {
    pub(crate) fn new(
        source: Arc<dyn EventSource>,
        channel: String,
        shapes: CpuShapeMap,
        store: Arc<dyn TaskStore>,
        registry: Arc<TaskRegistry>,
        bus: Bus,
    ) -> Arc<Self> {
        Arc::new(Self {
            source,
            channel,
            shapes,
            store,
            registry,
            bus,
            listener: Mutex::new(None),
        })
    }

    /// Subscribes to the notice channel. Returns `false` if already subscribed.
    ///
    /// # Errors
    /// [`GrabError::Source`] when the source refuses the subscription.
    pub async fn enable(self: &Arc<Self>) -> Result<bool, GrabError> {
        let mut slot = self.listener.lock().await;
        if slot.as_ref().is_some_and(|l| !l.join.is_finished()) {
            return Ok(false);
        }

        let mut rx = self.source.subscribe(&self.channel).await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let me = Arc::clone(self);

        let join = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(text) => {
                            if let Err(err) = me.handle_notice(&text).await {
                                warn!(error = %err, "stock notice handling failed");
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "stock notice listener lagged");
                        }
                        Err(RecvError::Closed) => {
                            warn!(channel = %me.channel, "stock notice channel closed");
                            break;
                        }
                    }
                }
            }
        });

        *slot = Some(Listener { cancel, join });
        self.bus.publish(
            Event::new(EventKind::TriggerSubscribed).with_reason(self.channel.as_str()),
        );
        Ok(true)
    }

    /// Unsubscribes and waits for the listener to exit. Returns `false` if not subscribed.
    pub async fn disable(&self) -> bool {
        let Some(listener) = self.listener.lock().await.take() else {
            return false;
        };
        listener.cancel.cancel();
        let _ = listener.join.await;
        self.bus.publish(Event::new(EventKind::TriggerUnsubscribed));
        true
    }

    pub async fn is_enabled(&self) -> bool {
        self.listener
            .lock()
            .await
            .as_ref()
            .is_some_and(|l| !l.join.is_finished())
    }

    /// Parses `text` and starts every stopped task it matches.
    ///
    /// # Errors
    /// [`GrabError::Store`] if stopped tasks cannot be listed. Profile read
    /// failures are reported per task in [`NoticeReport::failed`].
    pub async fn handle_notice(&self, text: &str) -> Result<NoticeReport, GrabError> {
        let Some(notice) = StockNotice::parse(text) else {
            debug!(text, "stock notice without region");
            self.bus
                .publish(Event::new(EventKind::NoticeIgnored).with_reason(text));
            return Ok(NoticeReport::default());
        };
        self.bus.publish(
            Event::new(EventKind::NoticeReceived).with_reason(notice.to_string()),
        );

        let mut report = NoticeReport {
            notice: Some(notice.clone()),
            ..NoticeReport::default()
        };
        let mut profiles: HashMap<ProfileId, Option<ProviderProfile>> = HashMap::new();

        for task in self.store.find_by_status(TaskStatus::Stopped).await? {
            let profile = match profiles.get(&task.profile_id) {
                Some(cached) => cached.clone(),
                None => match self.store.load_profile(task.profile_id).await {
                    Ok(loaded) => {
                        profiles.insert(task.profile_id, loaded.clone());
                        loaded
                    }
                    Err(err) => {
                        warn!(task_id = %task.id, profile_id = %task.profile_id, error = %err, "profile lookup failed");
                        report.failed.push((task.id, err.into()));
                        continue;
                    }
                },
            };
            let Some(profile) = profile else {
                debug!(task_id = %task.id, profile_id = %task.profile_id, "task has no profile");
                continue;
            };
            if !notice.is_region(&profile.region)
                || !self.shapes.matches(&task.shape, notice.cpu.as_deref())
            {
                continue;
            }

            match self
                .registry
                .start_with(task.id, StartReason::Notice(notice.clone()))
                .await
            {
                Ok(_) => report.started.push(task.id),
                Err(err) => {
                    warn!(task_id = %task.id, error = %err, "reactive start failed");
                    report.failed.push((task.id, err));
                }
            }
        }
        Ok(report)
    }
}
