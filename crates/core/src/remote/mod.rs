//! Remote-side contracts: the per-tenant document store and the transport that
//! replays queued operations.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;
use crate::outbox::OperationRequest;

pub use memory::InMemoryDocumentStore;

/// Root collection holding one document tree per pharmacy.
pub const TENANT_ROOT: &str = "pharmacies";

/// Largest number of documents removed by one batch delete call.
pub const BATCH_DELETE_LIMIT: usize = 500;

/// Named sub-collections under `pharmacies/{pharmacyId}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TenantCollection {
    Inventory,
    Sales,
    Suppliers,
    Patients,
    Trash,
    Payments,
    PurchaseOrders,
    SupplierReturns,
    TimeLogs,
    Config,
}

impl TenantCollection {
    pub const ALL: [TenantCollection; 10] = [
        TenantCollection::Inventory,
        TenantCollection::Sales,
        TenantCollection::Suppliers,
        TenantCollection::Patients,
        TenantCollection::Trash,
        TenantCollection::Payments,
        TenantCollection::PurchaseOrders,
        TenantCollection::SupplierReturns,
        TenantCollection::TimeLogs,
        TenantCollection::Config,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TenantCollection::Inventory => "inventory",
            TenantCollection::Sales => "sales",
            TenantCollection::Suppliers => "suppliers",
            TenantCollection::Patients => "patients",
            TenantCollection::Trash => "trash",
            TenantCollection::Payments => "payments",
            TenantCollection::PurchaseOrders => "purchaseOrders",
            TenantCollection::SupplierReturns => "supplierReturns",
            TenantCollection::TimeLogs => "timeLogs",
            TenantCollection::Config => "config",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

/// Relative URL of a collection: `/v1/pharmacies/{tenant}/{collection}`.
pub fn collection_path(tenant: &str, collection: TenantCollection) -> String {
    format!(
        "/v1/{}/{}/{}",
        TENANT_ROOT,
        urlencoding::encode(tenant),
        collection.as_str()
    )
}

/// Relative URL of a single document inside a tenant collection.
pub fn document_path(tenant: &str, collection: TenantCollection, id: &str) -> String {
    format!(
        "{}/{}",
        collection_path(tenant, collection),
        urlencoding::encode(id)
    )
}

/// A remote document tagged with its key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantDocument {
    pub id: String,
    pub data: serde_json::Value,
}

impl TenantDocument {
    /// Document body with `id` set to the document key, as stored locally.
    pub fn into_tagged_value(self) -> serde_json::Value {
        with_document_id(self.data, &self.id)
    }
}

/// Force the `id` field of an object body to the document key.
///
/// Non-object bodies are wrapped as `{ "id": .., "value": .. }`.
pub fn with_document_id(value: serde_json::Value, id: &str) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut fields) => {
            fields.insert("id".to_string(), serde_json::Value::String(id.to_string()));
            serde_json::Value::Object(fields)
        }
        other => serde_json::json!({ "id": id, "value": other }),
    }
}

/// Document key carried in an `id` field; numeric ids are rendered as strings.
pub fn document_key(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Merge `patch` into `target`: nested objects merge recursively, every other value
/// replaces what was there, fields absent from `patch` are untouched.
pub fn merge_document(target: &mut serde_json::Value, patch: serde_json::Value) {
    match (target, patch) {
        (serde_json::Value::Object(existing), serde_json::Value::Object(incoming)) => {
            for (key, value) in incoming {
                let nested = value.is_object() && existing.get(&key).is_some_and(|v| v.is_object());
                if !nested {
                    existing.insert(key, value);
                } else if let Some(slot) = existing.get_mut(&key) {
                    merge_document(slot, value);
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Hierarchical per-tenant document database.
///
/// Network failures surface as `RemoteUnavailable`; queuing on failure is the
/// caller's job, never the adapter's.
#[async_trait]
pub trait RemoteDocumentStoreTrait: Send + Sync {
    async fn get_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> Result<Option<serde_json::Value>>;

    /// Upsert with merge semantics.
    async fn set_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
        value: serde_json::Value,
    ) -> Result<()>;

    async fn get_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<Vec<TenantDocument>>;

    async fn delete_doc(&self, tenant: &str, collection: TenantCollection, id: &str)
        -> Result<()>;

    /// Delete every document of the collection, returning how many were removed.
    async fn delete_collection(&self, tenant: &str, collection: TenantCollection)
        -> Result<usize>;
}

/// Sends one write request to the remote system. `Ok` means a 2xx acknowledgement.
#[async_trait]
pub trait OperationTransportTrait: Send + Sync {
    async fn send(&self, request: &OperationRequest, idempotency_key: Option<&str>)
        -> Result<()>;
}
