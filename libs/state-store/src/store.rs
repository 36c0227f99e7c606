use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StateStoreError;

/// Key-value half of the shared state store.
///
/// Writes are last-writer-wins per key. Implementations must be cheap to
/// share across tasks.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Returns the value stored under `key`, if any.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the backend cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<Value>, StateStoreError>;

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the backend cannot be reached.
    async fn set(&self, key: &str, value: Value) -> Result<(), StateStoreError>;

    /// Removes `key`. Returns whether a value was present.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the backend cannot be reached.
    async fn delete(&self, key: &str) -> Result<bool, StateStoreError>;

    /// Lists keys starting with `prefix`, sorted.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Unavailable`] when the backend cannot be reached.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StateStoreError>;
}

/// Typed helpers on top of [`StateStore`].
#[async_trait]
pub trait StateStoreExt: StateStore {
    /// Reads and deserializes the value under `key`.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Malformed`] when the stored JSON does not
    /// match `T`, or any backend error.
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>, StateStoreError>
    where
        T: DeserializeOwned,
    {
        match self.get(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StateStoreError::Malformed {
                    key: key.to_owned(),
                    source,
                }),
            None => Ok(None),
        }
    }

    /// Serializes `value` and stores it under `key`.
    ///
    /// # Errors
    /// Returns [`StateStoreError::Encode`] if `value` cannot be serialized, or
    /// any backend error.
    async fn set_json<T>(&self, key: &str, value: &T) -> Result<(), StateStoreError>
    where
        T: Serialize + Sync,
    {
        let encoded = serde_json::to_value(value)?;
        self.set(key, encoded).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
