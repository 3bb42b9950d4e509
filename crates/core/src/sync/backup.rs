use log::info;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::kv::{KeyValueStoreTrait, StoreSnapshot};

/// Whole-store export and restore.
pub struct BackupService {
    store: Arc<dyn KeyValueStoreTrait>,
}

impl BackupService {
    pub fn new(store: Arc<dyn KeyValueStoreTrait>) -> Self {
        Self { store }
    }

    pub async fn get_all_data_for_backup(&self) -> Result<StoreSnapshot> {
        let snapshot = self.store.get_all().await?;
        info!("[KvStore] Exported {} record(s)", snapshot.len());
        Ok(snapshot)
    }

    /// Replace every local record with `snapshot`. Readers never see a partial import.
    pub async fn import_all_data(&self, snapshot: StoreSnapshot) -> Result<()> {
        if snapshot.keys().any(|key| key.trim().is_empty()) {
            return Err(Error::invalid_input("Backup contains an empty key"));
        }
        let count = snapshot.len();
        self.store.import_all(snapshot).await?;
        info!("[KvStore] Imported {} record(s)", count);
        Ok(())
    }

    /// Parse a backup file body.
    pub fn parse_backup(contents: &str) -> Result<StoreSnapshot> {
        match serde_json::from_str::<serde_json::Value>(contents)? {
            serde_json::Value::Object(fields) => Ok(fields.into_iter().collect()),
            _ => Err(Error::invalid_input("Backup must be a JSON object")),
        }
    }

    pub fn render_backup(snapshot: &StoreSnapshot) -> Result<String> {
        Ok(serde_json::to_string_pretty(snapshot)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::MemoryKeyValueStore;
    use serde_json::json;

    #[tokio::test]
    async fn export_then_import_restores_state() {
        let source = Arc::new(MemoryKeyValueStore::new());
        source.put("inventory", json!([{ "id": "I1" }])).await.unwrap();
        source.put("settings", json!({ "rtl": true })).await.unwrap();
        let exported = BackupService::new(source)
            .get_all_data_for_backup()
            .await
            .unwrap();

        let target = Arc::new(MemoryKeyValueStore::new());
        target.put("stale", json!(1)).await.unwrap();
        let backup = BackupService::new(target.clone());
        let text = BackupService::render_backup(&exported).unwrap();
        backup
            .import_all_data(BackupService::parse_backup(&text).unwrap())
            .await
            .unwrap();

        assert_eq!(target.get_all().await.unwrap(), exported);
        assert_eq!(target.get("stale").await.unwrap(), None);
    }

    #[test]
    fn non_object_backups_are_rejected() {
        let err = BackupService::parse_backup("[1, 2]").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(matches!(
            BackupService::parse_backup("{not json").unwrap_err(),
            Error::Serialization(_)
        ));
    }
}
