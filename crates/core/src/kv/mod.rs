//! Durable key-value store contract: the on-device source of truth for app state.

mod memory;

use async_trait::async_trait;
use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::errors::Result;

pub use memory::MemoryKeyValueStore;

/// Full-state snapshot of the store, keyed by record key.
pub type StoreSnapshot = BTreeMap<String, serde_json::Value>;

/// One key with its JSON value. Exactly one record exists per key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub key: String,
    pub value: serde_json::Value,
}

/// Local persistent store of arbitrary JSON application state.
///
/// A missing key is `Ok(None)`, never an error. `import_all` and `get_all` must be
/// atomic with respect to each other: a reader sees either the whole pre-import state
/// or the whole post-import state.
#[async_trait]
pub trait KeyValueStoreTrait: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    async fn clear(&self) -> Result<()>;

    /// Export every record.
    async fn get_all(&self) -> Result<StoreSnapshot>;

    /// Upsert several records in one transaction without touching other keys.
    async fn put_many(&self, records: StoreSnapshot) -> Result<()>;

    /// Replace the whole store with `snapshot` in one transaction.
    async fn import_all(&self, snapshot: StoreSnapshot) -> Result<()>;
}

/// Typed helpers on top of the JSON contract.
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStoreTrait {
    async fn get_as<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get(key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    async fn put_as<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        self.put(key, serde_json::to_value(value)?).await
    }
}

impl<S: KeyValueStoreTrait + ?Sized> KeyValueStoreExt for S {}

/// Read a typed value, falling back to `T::default()` when the backend is unavailable
/// or the key has never been written.
///
/// Other failures (corrupt JSON, query errors) are still returned to the caller.
pub async fn load_or_default<T>(store: &dyn KeyValueStoreTrait, key: &str) -> Result<T>
where
    T: DeserializeOwned + Default + Send,
{
    match store.get(key).await {
        Ok(Some(value)) => Ok(serde_json::from_value(value)?),
        Ok(None) => Ok(T::default()),
        Err(err) if err.is_storage_unavailable() => {
            warn!("[KvStore] '{}' falls back to defaults: {}", key, err);
            Ok(T::default())
        }
        Err(err) => Err(err),
    }
}
