//! SQLite persistence for the key-value store and the outbox.

pub mod db;
pub mod errors;
pub mod kv;
pub mod outbox;
pub mod schema;

use std::sync::Arc;

use pharmapos_core::Result;

pub use db::{create_pool, get_connection, init, run_migrations, spawn_writer, DbPool, WriteHandle};
pub use kv::KeyValueRepository;
pub use outbox::OutboxRepository;

/// Both repositories over one database file, sharing the pool and the writer.
pub struct LocalStorage {
    pub db_path: String,
    pub key_value: Arc<KeyValueRepository>,
    pub outbox: Arc<OutboxRepository>,
}

impl LocalStorage {
    /// Create the data directory if needed, migrate, and open the repositories.
    pub fn open(app_data_dir: &str) -> Result<Self> {
        let db_path = init(app_data_dir)?;
        run_migrations(&db_path)?;
        let pool = create_pool(&db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self {
            db_path,
            key_value: Arc::new(KeyValueRepository::new(Arc::clone(&pool), writer.clone())),
            outbox: Arc::new(OutboxRepository::new(pool, writer)),
        })
    }
}
