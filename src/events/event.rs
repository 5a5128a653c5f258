//! # Runtime events emitted by the registry, executors and trigger.
//!
//! [`EventKind`] groups events in four families:
//! - **Task lifecycle**: start, attempts, provisioning progress, terminal states
//! - **Trigger**: notices received/ignored, subscription changes
//! - **Shutdown**: signal observed, grace outcome
//! - **Subscriber**: overflow and panic reports from the fan-out workers
//!
//! These events are process telemetry. The user-visible audit trail of a task
//! is its [`TaskLogEntry`](crate::TaskLogEntry) rows, written by the executor
//! independently of the bus.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore order when events arrive out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use capgrab::{Event, EventKind, TaskId};
//!
//! let ev = Event::new(EventKind::AttemptRetryable)
//!     .with_task(TaskId(4))
//!     .with_attempt(3)
//!     .with_reason("Out of host capacity.")
//!     .with_delay(Duration::from_secs(31));
//!
//! assert_eq!(ev.task, Some(TaskId(4)));
//! assert_eq!(ev.delay_ms, Some(31_000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

use crate::tasks::TaskId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `subscriber` and `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `subscriber` and `reason` (`"full"` / `"closed"`).
    SubscriberOverflow,

    // === Shutdown events ===
    /// Shutdown requested (OS signal or explicit call).
    ShutdownRequested,

    /// All executors stopped within the grace period.
    AllStoppedWithin,

    /// Grace period exceeded; `reason` lists the stuck task ids.
    GraceExceeded,

    // === Task lifecycle events ===
    /// Executor spawned after a manual or reactive start.
    TaskStarted,

    /// Executor spawned by startup recovery.
    TaskRecovered,

    /// Provisioning attempt is starting. Sets `task`, `attempt`.
    AttemptStarting,

    /// Attempt hit a retryable provider error. Sets `task`, `attempt`, `reason`.
    AttemptRetryable,

    /// Attempt provisioned an instance. Sets `task`, `attempt`, `progress`.
    InstanceProvisioned,

    /// Executor is waiting before the next attempt. Sets `task`, `delay_ms`.
    WaitScheduled,

    /// Task reached its target count.
    TaskSucceeded,

    /// Task ended on a fatal error. Sets `task`, `reason`.
    TaskFailed,

    /// Task was stopped on request.
    TaskStopped,

    /// Execution handle removed from the registry (any exit path).
    TaskRemoved,

    /// Executor panicked; the task was marked failed. Sets `task`, `reason`.
    ExecutorPanicked,

    // === Trigger events ===
    /// Stock notice parsed. `reason` carries `region=.. cpu=..`.
    NoticeReceived,

    /// Notice could not be parsed. `reason` carries the raw text.
    NoticeIgnored,

    /// Reactive trigger subscribed to its channel.
    TriggerSubscribed,

    /// Reactive trigger unsubscribed.
    TriggerUnsubscribed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task the event is about, if any.
    pub task: Option<TaskId>,
    /// Attempt number within the current execution (starting from 1).
    pub attempt: Option<u32>,
    /// Wait before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason (errors, notice details, overflow details).
    pub reason: Option<Arc<str>>,
    /// `(current_count, target_count)` after a provisioning success.
    pub progress: Option<(u32, u32)>,
    /// Subscriber name for subscriber events.
    pub subscriber: Option<&'static str>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            attempt: None,
            delay_ms: None,
            reason: None,
            progress: None,
            subscriber: None,
        }
    }

    #[inline]
    pub fn with_task(mut self, id: TaskId) -> Self {
        self.task = Some(id);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a wait (stored as milliseconds, saturating).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_progress(mut self, current: u32, target: u32) -> Self {
        self.progress = Some((current, target));
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        let mut ev = Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"));
        ev.subscriber = Some(subscriber);
        ev
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        let mut ev = Event::new(EventKind::SubscriberPanicked).with_reason(info);
        ev.subscriber = Some(subscriber);
        ev
    }

    /// `true` for events produced by the subscriber machinery itself.
    #[inline]
    pub fn is_internal_diagnostic(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
