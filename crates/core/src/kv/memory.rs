use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{KeyValueStoreTrait, StoreSnapshot};
use crate::errors::Result;

/// Non-durable store used when the on-disk backend cannot be opened.
///
/// Holding the write lock across `import_all` gives the same all-or-nothing view to
/// readers that the durable backend gets from its transaction.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    records: RwLock<StoreSnapshot>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStoreTrait for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        Ok(self.records.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        self.records.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.records.write().await.clear();
        Ok(())
    }

    async fn get_all(&self) -> Result<StoreSnapshot> {
        Ok(self.records.read().await.clone())
    }

    async fn put_many(&self, records: StoreSnapshot) -> Result<()> {
        self.records.write().await.extend(records);
        Ok(())
    }

    async fn import_all(&self, snapshot: StoreSnapshot) -> Result<()> {
        *self.records.write().await = snapshot;
        Ok(())
    }
}
