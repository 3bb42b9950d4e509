//! Optimistic write path: local store first, then the remote or the outbox.

use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::driver::SyncDriver;
use crate::connectivity::ConnectivityMonitor;
use crate::errors::Result;
use crate::kv::KeyValueStoreTrait;
use crate::outbox::{OperationRequest, OutboxRepositoryTrait};
use crate::remote::OperationTransportTrait;

/// A local state change and, optionally, the remote write that mirrors it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalWrite {
    pub key: String,
    pub value: serde_json::Value,
    pub remote: Option<OperationRequest>,
}

impl LocalWrite {
    pub fn local(key: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            key: key.into(),
            value,
            remote: None,
        }
    }

    pub fn mirrored(
        key: impl Into<String>,
        value: serde_json::Value,
        remote: OperationRequest,
    ) -> Self {
        Self {
            key: key.into(),
            value,
            remote: Some(remote),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WriteOutcome {
    LocalOnly,
    Forwarded,
    Queued { operation_id: i64 },
}

pub struct OfflineWriter {
    store: Arc<dyn KeyValueStoreTrait>,
    outbox: Arc<dyn OutboxRepositoryTrait>,
    transport: Arc<dyn OperationTransportTrait>,
    monitor: ConnectivityMonitor,
    driver: Arc<SyncDriver>,
}

impl OfflineWriter {
    pub fn new(
        store: Arc<dyn KeyValueStoreTrait>,
        outbox: Arc<dyn OutboxRepositoryTrait>,
        transport: Arc<dyn OperationTransportTrait>,
        monitor: ConnectivityMonitor,
        driver: Arc<SyncDriver>,
    ) -> Self {
        Self {
            store,
            outbox,
            transport,
            monitor,
            driver,
        }
    }

    /// Apply `write` locally, then forward its remote part or queue it.
    ///
    /// Only network failures queue the operation; a request the remote rejects is
    /// returned to the caller.
    pub async fn write(&self, write: LocalWrite) -> Result<WriteOutcome> {
        let LocalWrite { key, value, remote } = write;

        match self.store.put(&key, value).await {
            Ok(()) => {}
            Err(err) if err.is_storage_unavailable() => {
                warn!("[KvStore] Local write of '{}' skipped: {}", key, err);
            }
            Err(err) => return Err(err),
        }

        match remote {
            Some(request) => self.forward_or_queue(request).await,
            None => Ok(WriteOutcome::LocalOnly),
        }
    }

    /// Delete a local key and mirror the deletion remotely.
    pub async fn remove(
        &self,
        key: &str,
        remote: Option<OperationRequest>,
    ) -> Result<WriteOutcome> {
        match self.store.delete(key).await {
            Ok(()) => {}
            Err(err) if err.is_storage_unavailable() => {
                warn!("[KvStore] Local delete of '{}' skipped: {}", key, err);
            }
            Err(err) => return Err(err),
        }
        match remote {
            Some(request) => self.forward_or_queue(request).await,
            None => Ok(WriteOutcome::LocalOnly),
        }
    }

    async fn forward_or_queue(&self, request: OperationRequest) -> Result<WriteOutcome> {
        request.ensure_queueable()?;
        if self.monitor.is_online() && self.outbox_is_empty().await {
            match self.transport.send(&request, None).await {
                Ok(()) => {
                    self.monitor.record_request_success();
                    debug!("[Outbox] Forwarded {} {}", request.method(), request.url);
                    return Ok(WriteOutcome::Forwarded);
                }
                Err(err) if err.is_connectivity_failure() => {
                    self.monitor.record_request_failure();
                    debug!("[Outbox] Forward failed, queuing: {}", err);
                }
                Err(err) => {
                    self.monitor.record_request_success();
                    return Err(err);
                }
            }
        }
        let operation_id = self.outbox.enqueue(request).await?;
        debug!("[Outbox] Queued operation #{}", operation_id);
        self.driver.notify_enqueued().await;
        Ok(WriteOutcome::Queued { operation_id })
    }

    async fn outbox_is_empty(&self) -> bool {
        match self.outbox.count().await {
            Ok(count) => count == 0,
            Err(err) => {
                warn!("[Outbox] Cannot read queue length, not forwarding: {}", err);
                false
            }
        }
    }
}
