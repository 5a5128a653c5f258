//! # Event subscriber trait.
//!
//! [`Subscribe`] is the extension point for plugging event handlers (audit
//! sinks, metrics, alerting) into the engine.
//!
//! Each subscriber gets a dedicated worker task and a bounded queue
//! (capacity via [`Subscribe::queue_capacity`]). Panics are caught and
//! reported as `EventKind::SubscriberPanicked`.
//!
//! ```text
//! SubscriberSet ──► [bounded queue] ──► worker task ──► subscriber.on_event()
//!                                    └─► panic caught → EventKind::SubscriberPanicked
//! ```
//!
//! ## Overflow behavior
//! When a queue is full the new event is dropped for that subscriber only and
//! `EventKind::SubscriberOverflow` is published.
//!
//! ## Example
//! ```rust
//! use async_trait::async_trait;
//! use capgrab::{Event, EventKind, Subscribe};
//!
//! struct FailureAlerts;
//!
//! #[async_trait]
//! impl Subscribe for FailureAlerts {
//!     async fn on_event(&self, ev: &Event) {
//!         if matches!(ev.kind, EventKind::TaskFailed | EventKind::ExecutorPanicked) {
//!             // page someone
//!         }
//!     }
//!
//!     fn name(&self) -> &'static str { "failure-alerts" }
//! }
//! ```

use async_trait::async_trait;

use crate::events::Event;

/// Event subscriber for runtime observability.
///
/// Implementations should use async I/O and handle their own errors; slow
/// processing only affects this subscriber's queue.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Processes a single event. Events arrive in FIFO order per subscriber.
    async fn on_event(&self, event: &Event);

    /// Name used in overflow/panic events.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred queue capacity (clamped to at least 1). Default: 1024.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
