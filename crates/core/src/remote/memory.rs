use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

use super::{
    merge_document, with_document_id, RemoteDocumentStoreTrait, TenantCollection,
    TenantDocument,
};
use crate::errors::Result;

type CollectionKey = (String, TenantCollection);

/// Document store held in process memory, with the same merge and id rules as the
/// hosted one.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<CollectionKey, BTreeMap<String, serde_json::Value>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteDocumentStoreTrait for InMemoryDocumentStore {
    async fn get_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> Result<Option<serde_json::Value>> {
        Ok(self
            .collections
            .read()
            .await
            .get(&(tenant.to_string(), collection))
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn set_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
        value: serde_json::Value,
    ) -> Result<()> {
        let mut collections = self.collections.write().await;
        let docs = collections
            .entry((tenant.to_string(), collection))
            .or_default();
        let incoming = with_document_id(value, id);
        match docs.get_mut(id) {
            Some(existing) => merge_document(existing, incoming),
            None => {
                docs.insert(id.to_string(), incoming);
            }
        }
        Ok(())
    }

    async fn get_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<Vec<TenantDocument>> {
        Ok(self
            .collections
            .read()
            .await
            .get(&(tenant.to_string(), collection))
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| TenantDocument {
                        id: id.clone(),
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete_doc(
        &self,
        tenant: &str,
        collection: TenantCollection,
        id: &str,
    ) -> Result<()> {
        if let Some(docs) = self
            .collections
            .write()
            .await
            .get_mut(&(tenant.to_string(), collection))
        {
            docs.remove(id);
        }
        Ok(())
    }

    async fn delete_collection(
        &self,
        tenant: &str,
        collection: TenantCollection,
    ) -> Result<usize> {
        Ok(self
            .collections
            .write()
            .await
            .remove(&(tenant.to_string(), collection))
            .map(|docs| docs.len())
            .unwrap_or(0))
    }
}
