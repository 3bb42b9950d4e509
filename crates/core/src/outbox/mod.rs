//! Pending-operation outbox: HTTP-shaped writes waiting for remote confirmation.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{Error, Result};
use crate::remote::{document_path, TenantCollection};

pub use memory::MemoryOutbox;

/// Header carrying the per-operation idempotency key on every replay.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// HTTP method of a queued request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Head,
    Options,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }

    /// Only writes are eligible for queuing; replaying a stale read means nothing.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch | HttpMethod::Delete
        )
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            _ => None,
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestOptions {
    pub method: HttpMethod,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

/// A write request addressed at the remote system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRequest {
    pub url: String,
    pub options: RequestOptions,
}

impl OperationRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            options: RequestOptions {
                method,
                headers: BTreeMap::new(),
                body: None,
            },
        }
    }

    pub fn post(url: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(HttpMethod::Post, url).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.options.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options.headers.insert(name.into(), value.into());
        self
    }

    /// Merge-upsert of one tenant document, in the shape the document API accepts.
    pub fn set_document(
        tenant: &str,
        collection: TenantCollection,
        id: &str,
        value: serde_json::Value,
    ) -> Self {
        let url = format!("{}?merge=true", document_path(tenant, collection, id));
        Self::new(HttpMethod::Patch, url).with_body(value)
    }

    pub fn delete_document(tenant: &str, collection: TenantCollection, id: &str) -> Self {
        Self::new(HttpMethod::Delete, document_path(tenant, collection, id))
    }

    pub fn method(&self) -> HttpMethod {
        self.options.method
    }

    pub fn ensure_queueable(&self) -> Result<()> {
        if !self.options.method.is_write() {
            return Err(Error::invalid_input(format!(
                "{} {} is not a write and cannot be queued",
                self.options.method, self.url
            )));
        }
        if self.url.trim().is_empty() {
            return Err(Error::invalid_input("Queued operation URL is empty"));
        }
        Ok(())
    }
}

/// A deferred write stored in the outbox.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedOperation {
    pub id: i64,
    #[serde(flatten)]
    pub request: OperationRequest,
    pub idempotency_key: String,
    pub retry_count: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
    pub created_at: String,
}

/// Durable FIFO of operations waiting for the remote system.
///
/// `enqueue` returns only once the operation is durable. Ids grow monotonically and
/// are never reused, so id order is enqueue order.
#[async_trait]
pub trait OutboxRepositoryTrait: Send + Sync {
    async fn enqueue(&self, request: OperationRequest) -> Result<i64>;

    /// Every queued operation, oldest first.
    async fn list_all(&self) -> Result<Vec<QueuedOperation>>;

    async fn head(&self) -> Result<Option<QueuedOperation>>;

    async fn remove_by_id(&self, id: i64) -> Result<()>;

    /// Record a failed replay attempt. The operation stays queued.
    async fn record_failure(&self, id: i64, message: String) -> Result<()>;

    async fn count(&self) -> Result<usize>;
}
