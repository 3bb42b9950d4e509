//! Pull remote tenant collections into the local store, and push local ones back.

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::kv::{KeyValueStoreTrait, StoreSnapshot};
use crate::outbox::OutboxRepositoryTrait;
use crate::remote::{document_key, RemoteDocumentStoreTrait, TenantCollection};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum PullOutcome {
    /// Local writes are still queued; pulling now would overwrite them.
    Skipped { pending: usize },
    /// Documents stored per collection.
    Pulled { documents: BTreeMap<String, usize> },
}

pub struct TenantReconciler {
    store: Arc<dyn KeyValueStoreTrait>,
    remote: Arc<dyn RemoteDocumentStoreTrait>,
    outbox: Arc<dyn OutboxRepositoryTrait>,
}

impl TenantReconciler {
    pub fn new(
        store: Arc<dyn KeyValueStoreTrait>,
        remote: Arc<dyn RemoteDocumentStoreTrait>,
        outbox: Arc<dyn OutboxRepositoryTrait>,
    ) -> Self {
        Self {
            store,
            remote,
            outbox,
        }
    }

    /// Replace the local copy of one collection with the remote one.
    ///
    /// Skipped while local writes are queued, like `pull_all`.
    pub async fn pull_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<PullOutcome> {
        if let Some(skipped) = self.skip_if_pending(tenant).await? {
            return Ok(skipped);
        }

        let documents = self.fetch(tenant, collection).await?;
        // A write queued while the fetch was in flight must not be overwritten.
        if let Some(skipped) = self.skip_if_pending(tenant).await? {
            return Ok(skipped);
        }
        let count = documents.len();
        self.store
            .put(collection.as_str(), serde_json::Value::Array(documents))
            .await?;
        debug!(
            "[KvStore] Pulled {} '{}' document(s) for {}",
            count,
            collection.as_str(),
            tenant
        );
        Ok(PullOutcome::Pulled {
            documents: BTreeMap::from([(collection.as_str().to_string(), count)]),
        })
    }

    /// Pull every tenant collection and store them in one transaction.
    pub async fn pull_all(&self, tenant: &str) -> Result<PullOutcome> {
        if let Some(skipped) = self.skip_if_pending(tenant).await? {
            return Ok(skipped);
        }

        let mut records = StoreSnapshot::new();
        let mut documents = BTreeMap::new();
        for collection in TenantCollection::ALL {
            let docs = self.fetch(tenant, collection).await?;
            documents.insert(collection.as_str().to_string(), docs.len());
            records.insert(
                collection.as_str().to_string(),
                serde_json::Value::Array(docs),
            );
        }
        if let Some(skipped) = self.skip_if_pending(tenant).await? {
            return Ok(skipped);
        }
        self.store.put_many(records).await?;
        info!(
            "[KvStore] Pulled {} collection(s) for {}",
            documents.len(),
            tenant
        );
        Ok(PullOutcome::Pulled { documents })
    }

    async fn skip_if_pending(&self, tenant: &str) -> Result<Option<PullOutcome>> {
        let pending = self.outbox.count().await?;
        if pending == 0 {
            return Ok(None);
        }
        info!(
            "[KvStore] Skipping pull for {}: {} local write(s) not yet synced",
            tenant, pending
        );
        Ok(Some(PullOutcome::Skipped { pending }))
    }

    /// Upload every locally stored document of `collection`. Returns how many were sent.
    pub async fn push_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<usize> {
        let local = match self.store.get(collection.as_str()).await? {
            Some(value) => value,
            None => return Ok(0),
        };
        let serde_json::Value::Array(items) = local else {
            return Err(Error::invalid_input(format!(
                "Local '{}' is not a list of documents",
                collection.as_str()
            )));
        };

        let mut pushed = 0;
        for item in items {
            let Some(id) = item
                .get("id")
                .and_then(document_key)
                .filter(|id| !id.is_empty())
            else {
                warn!(
                    "[KvStore] Skipping '{}' entry without an id",
                    collection.as_str()
                );
                continue;
            };
            self.remote.set_doc(tenant, collection, &id, item).await?;
            pushed += 1;
        }
        Ok(pushed)
    }

    async fn fetch(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<Vec<serde_json::Value>> {
        Ok(self
            .remote
            .get_collection(tenant, collection)
            .await?
            .into_iter()
            .map(|doc| doc.into_tagged_value())
            .collect())
    }
}
