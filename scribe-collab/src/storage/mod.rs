//! Persistence seams for documents and chat messages.
//!
//! The core does not own storage: documents and messages live in an
//! external store reached through these traits. The in-memory
//! implementations in [`memory`] back local runs and tests; a real
//! deployment points the same traits at its database.

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use scribe_doc::DocumentTree;

use crate::protocol::DocumentId;

pub use memory::{FailingMessageStore, MemoryDocumentStore, MemoryMessageStore};

/// Store-level failures, kept separate from the collaboration taxonomy
/// so callers decide whether a miss is `NotFound` or fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// A persisted document row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: DocumentId,
    pub user_id: String,
    pub title: String,
    /// Expected to be a JSON array of block nodes; see [`Self::content_tree`].
    pub content: Value,
    pub created_at: u64,
    pub updated_at: u64,
}

impl DocumentRecord {
    /// Decode `content` into a valid tree.
    ///
    /// Stores have been observed returning the content as a
    /// JSON-encoded string or as a non-array value; both degradations
    /// are repaired here (re-parse, or fall back to a single empty
    /// paragraph) so tree operations always resume from a valid state.
    pub fn content_tree(&self) -> DocumentTree {
        DocumentTree::from_store_content(&self.content)
    }
}

/// A persisted chat message row. Append-only: written once on send,
/// never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: Uuid,
    pub user_id: String,
    pub user_name: String,
    pub document_id: DocumentId,
    pub message: String,
    pub created_at: u64,
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn create(
        &self,
        user_id: &str,
        title: &str,
        content: Value,
    ) -> Result<DocumentRecord, StoreError>;
    async fn get(&self, id: &str) -> Result<DocumentRecord, StoreError>;
    async fn update(
        &self,
        id: &str,
        title: Option<String>,
        content: Option<Value>,
    ) -> Result<DocumentRecord, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
    async fn list_for_user(&self, user_id: &str) -> Result<Vec<DocumentRecord>, StoreError>;
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, record: MessageRecord) -> Result<(), StoreError>;
    /// The most recent messages for a document, newest first (the chat
    /// contract re-sorts to ascending before delivery).
    async fn recent(
        &self,
        document_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageRecord>, StoreError>;
}
