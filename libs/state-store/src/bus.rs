use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

use crate::error::StateStoreError;

/// A message carried on the bus.
///
/// `instance` identifies the publishing coordinator so subscribers can drop
/// their own echoes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub instance: String,
    pub payload: Value,
}

impl BusMessage {
    #[must_use]
    pub fn new(instance: impl Into<String>, payload: Value) -> Self {
        Self {
            instance: instance.into(),
            payload,
        }
    }

    /// Whether this message was published by `instance`.
    #[must_use]
    pub fn is_from(&self, instance: &str) -> bool {
        self.instance == instance
    }
}

/// Publish/subscribe half of the shared state store.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes `message` on `topic`. Returns the number of live subscribers
    /// that will observe it; zero is not an error.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the bus cannot be reached.
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<usize, StateStoreError>;

    /// Subscribes to `topic`. Only messages published after this call are
    /// delivered.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the bus cannot be reached.
    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, StateStoreError>;
}

/// Receiving end of a bus subscription.
pub struct BusSubscription {
    topic: String,
    rx: broadcast::Receiver<BusMessage>,
}

impl BusSubscription {
    #[must_use]
    pub fn new(topic: impl Into<String>, rx: broadcast::Receiver<BusMessage>) -> Self {
        Self {
            topic: topic.into(),
            rx,
        }
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Waits for the next message. Returns `None` once the topic is closed.
    ///
    /// A lagging subscriber skips the messages it missed and keeps going; the
    /// bus only carries invalidation hints, so the state store remains the
    /// place to re-read from.
    pub async fn recv(&mut self) -> Option<BusMessage> {
        loop {
            match self.rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.topic, skipped, "bus subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}
