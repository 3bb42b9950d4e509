use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;
use std::sync::Arc;

use pharmapos_core::kv::{KeyValueStoreTrait, StoreSnapshot};
use pharmapos_core::Result;

use super::model::AppStateDB;
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::app_state;

pub struct KeyValueRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl KeyValueRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn encode_records(records: StoreSnapshot) -> Result<Vec<AppStateDB>> {
    let now = Utc::now().to_rfc3339();
    records
        .into_iter()
        .map(|(key, value)| -> Result<AppStateDB> {
            Ok(AppStateDB::new(key, serde_json::to_string(&value)?, now.clone()))
        })
        .collect()
}

fn upsert(conn: &mut SqliteConnection, row: &AppStateDB) -> Result<()> {
    diesel::insert_into(app_state::table)
        .values(row)
        .on_conflict(app_state::key)
        .do_update()
        .set((
            app_state::value.eq(&row.value),
            app_state::updated_at.eq(&row.updated_at),
        ))
        .execute(conn)
        .map_err(StorageError::from)?;
    Ok(())
}

#[async_trait]
impl KeyValueStoreTrait for KeyValueRepository {
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let mut conn = get_connection(&self.pool)?;
        let stored = app_state::table
            .find(key)
            .select(app_state::value)
            .first::<String>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        match stored {
            Some(text) => Ok(Some(serde_json::from_str(&text)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, value: serde_json::Value) -> Result<()> {
        let row = AppStateDB::new(
            key.to_string(),
            serde_json::to_string(&value)?,
            Utc::now().to_rfc3339(),
        );
        self.writer.exec(move |conn| upsert(conn, &row)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = key.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(app_state::table.find(key))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn clear(&self) -> Result<()> {
        self.writer
            .exec(|conn| {
                let removed = diesel::delete(app_state::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                debug!("[KvStore] Cleared {} record(s)", removed);
                Ok(())
            })
            .await
    }

    async fn get_all(&self) -> Result<StoreSnapshot> {
        let mut conn = get_connection(&self.pool)?;
        // One statement, so it reads a single WAL snapshot.
        let rows = app_state::table
            .order(app_state::key.asc())
            .load::<AppStateDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter()
            .map(|row| -> Result<(String, serde_json::Value)> {
                Ok((row.key, serde_json::from_str(&row.value)?))
            })
            .collect()
    }

    async fn put_many(&self, records: StoreSnapshot) -> Result<()> {
        let rows = encode_records(records)?;
        self.writer
            .exec(move |conn| {
                for row in &rows {
                    upsert(conn, row)?;
                }
                Ok(())
            })
            .await
    }

    async fn import_all(&self, snapshot: StoreSnapshot) -> Result<()> {
        let rows = encode_records(snapshot)?;
        self.writer
            .exec(move |conn| {
                diesel::delete(app_state::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                for row in &rows {
                    diesel::insert_into(app_state::table)
                        .values(row)
                        .execute(conn)
                        .map_err(StorageError::from)?;
                }
                Ok(())
            })
            .await
    }
}
