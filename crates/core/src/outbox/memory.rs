use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{OperationRequest, OutboxRepositoryTrait, QueuedOperation};
use crate::errors::Result;

#[derive(Debug, Default)]
struct MemoryOutboxState {
    next_id: i64,
    operations: BTreeMap<i64, QueuedOperation>,
}

/// Process-local outbox used when the durable backend cannot be opened.
///
/// Operations do not survive a restart.
#[derive(Debug, Default)]
pub struct MemoryOutbox {
    state: Mutex<MemoryOutboxState>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OutboxRepositoryTrait for MemoryOutbox {
    async fn enqueue(&self, request: OperationRequest) -> Result<i64> {
        request.ensure_queueable()?;
        let mut state = self.state.lock().await;
        state.next_id += 1;
        let id = state.next_id;
        state.operations.insert(
            id,
            QueuedOperation {
                id,
                request,
                idempotency_key: Uuid::now_v7().to_string(),
                retry_count: 0,
                last_error: None,
                last_attempt_at: None,
                created_at: Utc::now().to_rfc3339(),
            },
        );
        Ok(id)
    }

    async fn list_all(&self) -> Result<Vec<QueuedOperation>> {
        Ok(self.state.lock().await.operations.values().cloned().collect())
    }

    async fn head(&self) -> Result<Option<QueuedOperation>> {
        Ok(self
            .state
            .lock()
            .await
            .operations
            .values()
            .next()
            .cloned())
    }

    async fn remove_by_id(&self, id: i64) -> Result<()> {
        self.state.lock().await.operations.remove(&id);
        Ok(())
    }

    async fn record_failure(&self, id: i64, message: String) -> Result<()> {
        let mut state = self.state.lock().await;
        if let Some(op) = state.operations.get_mut(&id) {
            op.retry_count += 1;
            op.last_error = Some(message);
            op.last_attempt_at = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.state.lock().await.operations.len())
    }
}
