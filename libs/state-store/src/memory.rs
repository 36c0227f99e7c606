use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::bus::{BusMessage, BusSubscription, MessageBus};
use crate::error::StateStoreError;
use crate::store::StateStore;

const TOPIC_CAPACITY: usize = 256;

#[derive(Default)]
struct Inner {
    values: DashMap<String, Value>,
    topics: DashMap<String, broadcast::Sender<BusMessage>>,
}

/// Process-local state store and bus.
///
/// Clones share the same keys and topics.
#[derive(Clone, Default)]
pub struct InMemoryStateStore {
    inner: Arc<Inner>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.inner
            .topics
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StateStoreError> {
        Ok(self.inner.values.get(key).map(|v| v.value().clone()))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StateStoreError> {
        self.inner.values.insert(key.to_owned(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StateStoreError> {
        Ok(self.inner.values.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StateStoreError> {
        let mut keys: Vec<String> = self
            .inner
            .values
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}

#[async_trait]
impl MessageBus for InMemoryStateStore {
    async fn publish(&self, topic: &str, message: BusMessage) -> Result<usize, StateStoreError> {
        // A send error only means nobody is listening right now.
        Ok(self.sender(topic).send(message).unwrap_or(0))
    }

    async fn subscribe(&self, topic: &str) -> Result<BusSubscription, StateStoreError> {
        Ok(BusSubscription::new(topic, self.sender(topic).subscribe()))
    }
}
