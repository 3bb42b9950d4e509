use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use log::debug;
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

use pharmapos_core::errors::{DatabaseError, Error, Result};
use pharmapos_core::outbox::{
    HttpMethod, OperationRequest, OutboxRepositoryTrait, QueuedOperation, RequestOptions,
};

use super::model::{NewPendingOperationDB, PendingOperationDB};
use crate::db::{get_connection, DbPool, WriteHandle};
use crate::errors::StorageError;
use crate::schema::pending_operations;

pub struct OutboxRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl OutboxRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }
}

fn to_new_row(request: &OperationRequest) -> Result<NewPendingOperationDB> {
    let body = match &request.options.body {
        Some(body) => Some(serde_json::to_string(body)?),
        None => None,
    };
    Ok(NewPendingOperationDB {
        url: request.url.clone(),
        method: request.options.method.as_str().to_string(),
        headers: serde_json::to_string(&request.options.headers)?,
        body,
        idempotency_key: Uuid::now_v7().to_string(),
        retry_count: 0,
        created_at: Utc::now().to_rfc3339(),
    })
}

fn to_queued_operation(row: PendingOperationDB) -> Result<QueuedOperation> {
    let method = HttpMethod::parse(&row.method).ok_or_else(|| {
        Error::Database(DatabaseError::Internal(format!(
            "Queued operation {} has unknown method '{}'",
            row.id, row.method
        )))
    })?;
    let headers: BTreeMap<String, String> = serde_json::from_str(&row.headers)?;
    let body = match row.body.as_deref() {
        Some(text) => Some(serde_json::from_str(text)?),
        None => None,
    };
    Ok(QueuedOperation {
        id: row.id,
        request: OperationRequest {
            url: row.url,
            options: RequestOptions {
                method,
                headers,
                body,
            },
        },
        idempotency_key: row.idempotency_key,
        retry_count: row.retry_count,
        last_error: row.last_error,
        last_attempt_at: row.last_attempt_at,
        created_at: row.created_at,
    })
}

#[async_trait]
impl OutboxRepositoryTrait for OutboxRepository {
    async fn enqueue(&self, request: OperationRequest) -> Result<i64> {
        request.ensure_queueable()?;
        let row = to_new_row(&request)?;
        let id = self
            .writer
            .exec(move |conn| {
                let id = diesel::insert_into(pending_operations::table)
                    .values(&row)
                    .returning(pending_operations::id)
                    .get_result::<i64>(conn)
                    .map_err(StorageError::from)?;
                Ok(id)
            })
            .await?;
        debug!(
            "[Outbox] Enqueued #{} {} {}",
            id,
            request.method(),
            request.url
        );
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<QueuedOperation>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = pending_operations::table
            .order(pending_operations::id.asc())
            .select(PendingOperationDB::as_select())
            .load::<PendingOperationDB>(&mut conn)
            .map_err(StorageError::from)?;
        rows.into_iter().map(to_queued_operation).collect()
    }

    async fn head(&self) -> Result<Option<QueuedOperation>> {
        let mut conn = get_connection(&self.pool)?;
        let row = pending_operations::table
            .order(pending_operations::id.asc())
            .select(PendingOperationDB::as_select())
            .first::<PendingOperationDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;
        row.map(to_queued_operation).transpose()
    }

    async fn remove_by_id(&self, id: i64) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::delete(pending_operations::table.find(id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await?;
        debug!("[Outbox] Removed #{}", id);
        Ok(())
    }

    async fn record_failure(&self, id: i64, message: String) -> Result<()> {
        self.writer
            .exec(move |conn| {
                diesel::update(pending_operations::table.find(id))
                    .set((
                        pending_operations::retry_count.eq(pending_operations::retry_count + 1),
                        pending_operations::last_error.eq(Some(message)),
                        pending_operations::last_attempt_at.eq(Some(Utc::now().to_rfc3339())),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn count(&self) -> Result<usize> {
        let mut conn = get_connection(&self.pool)?;
        let count = pending_operations::table
            .count()
            .get_result::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
