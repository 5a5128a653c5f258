//! # External notice source.
//!
//! [`EventSource`] abstracts a pub/sub channel (a message broker in
//! production). Subscribing yields a `broadcast::Receiver<String>`; dropping
//! the receiver unsubscribes.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::error::SourceError;

/// Pub/sub channel carrying free-text notices.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Subscribes to `channel`.
    ///
    /// # Errors
    /// [`SourceError`] when the source is unreachable.
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, SourceError>;
}

/// In-process [`EventSource`] backed by one broadcast channel per name.
pub struct BroadcastSource {
    capacity: usize,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
}

impl Default for BroadcastSource {
    fn default() -> Self {
        Self::new(256)
    }
}

impl BroadcastSource {
    /// Creates a source whose channels buffer `capacity` notices (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Mutex::new(HashMap::new()),
        }
    }

    fn sender(&self, channel: &str) -> broadcast::Sender<String> {
        let mut channels = self
            .channels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }

    /// Publishes a notice. Returns the number of subscribers that received it.
    pub fn publish(&self, channel: &str, message: impl Into<String>) -> usize {
        self.sender(channel).send(message.into()).unwrap_or(0)
    }

    /// Number of live subscriptions on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.sender(channel).receiver_count()
    }
}

#[async_trait]
impl EventSource for BroadcastSource {
    async fn subscribe(&self, channel: &str) -> Result<broadcast::Receiver<String>, SourceError> {
        Ok(self.sender(channel).subscribe())
    }
}
