//! # Event bus for broadcasting runtime events.
//!
//! [`Bus`] wraps [`tokio::sync::broadcast`]: publishing never blocks, and
//! every receiver gets its own clone of each event.
//!
//! ```text
//! Publishers (many):                  Listener (one):
//!   Registry  ──┐
//!   Executor N ─┼──────► Bus ───────► Engine listener ────► SubscriberSet
//!   Trigger   ──┤  (broadcast chan)
//!   Engine    ──┘
//! ```
//!
//! ## Rules
//! - Bounded ring buffer shared by all receivers; slow receivers observe
//!   `RecvError::Lagged(n)` and skip the `n` oldest events.
//! - Events sent while nobody listens are dropped.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus holding at most `capacity` undelivered events (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver observing events sent from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
