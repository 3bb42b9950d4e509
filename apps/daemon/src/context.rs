use std::sync::Arc;

use pharmapos_core::connectivity::ConnectivityMonitor;
use pharmapos_core::kv::{KeyValueStoreTrait, MemoryKeyValueStore};
use pharmapos_core::outbox::{MemoryOutbox, OutboxRepositoryTrait};
use pharmapos_core::sync::{BackupService, OfflineWriter, SyncDriver, SyncPolicy, TenantReconciler};
use pharmapos_remote::RemoteApiClient;
use pharmapos_storage_sqlite::LocalStorage;

/// Where local state lives for this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageMode {
    Durable { db_path: String },
    /// The database could not be opened; nothing survives a restart.
    Memory,
}

/// Settings needed to wire the services together.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub data_dir: String,
    pub api_url: String,
    pub api_token: Option<String>,
    pub start_offline: bool,
    pub policy: SyncPolicy,
}

/// Application root: owns every service and hands out shared handles.
pub struct AppContext {
    pub storage_mode: StorageMode,
    pub store: Arc<dyn KeyValueStoreTrait>,
    pub outbox: Arc<dyn OutboxRepositoryTrait>,
    pub monitor: ConnectivityMonitor,
    pub remote: Arc<RemoteApiClient>,
    pub driver: Arc<SyncDriver>,
    pub writer: Arc<OfflineWriter>,
    pub reconciler: Arc<TenantReconciler>,
    pub backup: Arc<BackupService>,
}

impl AppContext {
    pub fn initialize(config: ContextConfig) -> anyhow::Result<Self> {
        let (storage_mode, store, outbox) = open_storage(&config.data_dir)?;

        let monitor = ConnectivityMonitor::new(!config.start_offline);
        let remote = Arc::new(RemoteApiClient::new(
            &config.api_url,
            config.api_token.clone(),
        )?);

        let driver = Arc::new(SyncDriver::new(
            Arc::clone(&outbox),
            remote.clone(),
            monitor.clone(),
            config.policy.clone(),
        ));
        let writer = Arc::new(OfflineWriter::new(
            Arc::clone(&store),
            Arc::clone(&outbox),
            remote.clone(),
            monitor.clone(),
            Arc::clone(&driver),
        ));
        let reconciler = Arc::new(TenantReconciler::new(
            Arc::clone(&store),
            remote.clone(),
            Arc::clone(&outbox),
        ));
        let backup = Arc::new(BackupService::new(Arc::clone(&store)));

        Ok(Self {
            storage_mode,
            store,
            outbox,
            monitor,
            remote,
            driver,
            writer,
            reconciler,
            backup,
        })
    }

    pub fn driver(&self) -> Arc<SyncDriver> {
        Arc::clone(&self.driver)
    }

    pub fn writer(&self) -> Arc<OfflineWriter> {
        Arc::clone(&self.writer)
    }

    pub fn reconciler(&self) -> Arc<TenantReconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn backup(&self) -> Arc<BackupService> {
        Arc::clone(&self.backup)
    }

    pub fn is_durable(&self) -> bool {
        matches!(self.storage_mode, StorageMode::Durable { .. })
    }
}

type OpenedStorage = (
    StorageMode,
    Arc<dyn KeyValueStoreTrait>,
    Arc<dyn OutboxRepositoryTrait>,
);

fn open_storage(data_dir: &str) -> anyhow::Result<OpenedStorage> {
    match LocalStorage::open(data_dir) {
        Ok(storage) => {
            log::info!("[KvStore] Using database at {}", storage.db_path);
            let store: Arc<dyn KeyValueStoreTrait> = storage.key_value;
            let outbox: Arc<dyn OutboxRepositoryTrait> = storage.outbox;
            Ok((
                StorageMode::Durable {
                    db_path: storage.db_path,
                },
                store,
                outbox,
            ))
        }
        Err(err) if err.is_storage_unavailable() => {
            log::warn!(
                "[KvStore] Durable storage unavailable ({}); keeping state in memory for this session",
                err
            );
            let store: Arc<dyn KeyValueStoreTrait> = Arc::new(MemoryKeyValueStore::new());
            let outbox: Arc<dyn OutboxRepositoryTrait> = Arc::new(MemoryOutbox::new());
            Ok((StorageMode::Memory, store, outbox))
        }
        Err(err) => Err(err.into()),
    }
}
