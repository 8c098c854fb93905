//! Owner-scoped document access.
//!
//! Every read or write is checked against the verified identity of the
//! caller; a document is visible only to the user who created it. A
//! missing document and a document owned by someone else are distinct
//! failures so clients can tell them apart.

use std::sync::Arc;

use serde_json::Value;

use crate::auth::Identity;
use crate::error::CollabError;
use crate::storage::{DocumentRecord, DocumentStore, StoreError};

pub struct DocumentService {
    store: Arc<dyn DocumentStore>,
}

impl DocumentService {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        DocumentService { store }
    }

    fn map_err(err: StoreError) -> CollabError {
        match err {
            StoreError::NotFound => CollabError::NotFound,
            other => CollabError::PersistenceFailure(other.to_string()),
        }
    }

    fn owned(record: DocumentRecord, caller: &Identity) -> Result<DocumentRecord, CollabError> {
        if record.user_id == caller.user_id {
            Ok(record)
        } else {
            Err(CollabError::Forbidden)
        }
    }

    pub async fn create(
        &self,
        caller: &Identity,
        title: &str,
        content: Value,
    ) -> Result<DocumentRecord, CollabError> {
        self.store
            .create(&caller.user_id, title, content)
            .await
            .map_err(Self::map_err)
    }

    pub async fn get(&self, caller: &Identity, id: &str) -> Result<DocumentRecord, CollabError> {
        let record = self.store.get(id).await.map_err(Self::map_err)?;
        Self::owned(record, caller)
    }

    pub async fn update(
        &self,
        caller: &Identity,
        id: &str,
        title: Option<String>,
        content: Option<Value>,
    ) -> Result<DocumentRecord, CollabError> {
        // Fetch first so a non-owner never mutates the record.
        let record = self.store.get(id).await.map_err(Self::map_err)?;
        Self::owned(record, caller)?;
        self.store
            .update(id, title, content)
            .await
            .map_err(Self::map_err)
    }

    pub async fn delete(&self, caller: &Identity, id: &str) -> Result<(), CollabError> {
        let record = self.store.get(id).await.map_err(Self::map_err)?;
        Self::owned(record, caller)?;
        self.store.delete(id).await.map_err(Self::map_err)
    }

    pub async fn list(&self, caller: &Identity) -> Result<Vec<DocumentRecord>, CollabError> {
        self.store
            .list_for_user(&caller.user_id)
            .await
            .map_err(Self::map_err)
    }
}
