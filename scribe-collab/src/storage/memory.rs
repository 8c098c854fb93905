//! In-memory store implementations.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::protocol::now_millis;
use crate::storage::{DocumentRecord, DocumentStore, MessageRecord, MessageStore, StoreError};

/// Map-backed document store.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    docs: RwLock<HashMap<String, DocumentRecord>>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        content: Value,
    ) -> Result<DocumentRecord, StoreError> {
        let now = now_millis();
        let record = DocumentRecord {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title: title.to_string(),
            content,
            created_at: now,
            updated_at: now,
        };
        self.docs
            .write()
            .await
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn get(&self, id: &str) -> Result<DocumentRecord, StoreError> {
        self.docs
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn update(
        &self,
        id: &str,
        title: Option<String>,
        content: Option<Value>,
    ) -> Result<DocumentRecord, StoreError> {
        let mut docs = self.docs.write().await;
        let record = docs.get_mut(id).ok_or(StoreError::NotFound)?;
        if let Some(title) = title {
            record.title = title;
        }
        if let Some(content) = content {
            record.content = content;
        }
        record.updated_at = now_millis();
        Ok(record.clone())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.docs
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    async fn list_for_user(&self, user_id: &str) -> Result<Vec<DocumentRecord>, StoreError> {
        let docs = self.docs.read().await;
        let mut out: Vec<DocumentRecord> = docs
            .values()
            .filter(|d| d.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.created_at);
        Ok(out)
    }
}

/// Append-only in-memory message log. `recent` returns newest first,
/// matching how a real store would page a descending index.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: RwLock<Vec<MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total messages held, across all documents.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn append(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.messages.write().await.push(record);
        Ok(())
    }

    async fn recent(
        &self,
        document_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .rev()
            .filter(|m| m.document_id == document_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

/// Fault-injecting message store: every append fails. Used to verify
/// that a message that cannot be persisted is never broadcast.
#[derive(Debug, Default)]
pub struct FailingMessageStore {
    attempts: AtomicU64,
}

impl FailingMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many appends were attempted (and refused).
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageStore for FailingMessageStore {
    async fn append(&self, _record: MessageRecord) -> Result<(), StoreError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(StoreError::Backend("injected fault".into()))
    }

    async fn recent(
        &self,
        _document_id: &str,
        _limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        Ok(Vec::new())
    }
}
