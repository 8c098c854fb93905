//! Per-document chat. Messages are persisted first and broadcast only
//! after the write succeeds, so every frame a member sees is also in
//! the history. Unlike document changes, chat echoes go to the sender
//! too; the echoed frame carries the server-assigned id and timestamp.

use std::sync::Arc;

use log::debug;
use uuid::Uuid;

use crate::auth::Identity;
use crate::error::CollabError;
use crate::protocol::{now_millis, ChatMessage, DocumentId, WireEvent};
use crate::room::{Outbound, SessionManager};
use crate::storage::{MessageRecord, MessageStore, StoreError};

pub struct ChatService {
    store: Arc<dyn MessageStore>,
}

impl ChatService {
    pub fn new(store: Arc<dyn MessageStore>) -> Self {
        ChatService { store }
    }

    /// Persist a message and echo it to the whole room, sender included.
    /// If the write fails nothing is broadcast and the caller reports
    /// the failure to the sender alone.
    pub async fn send_message(
        &self,
        sessions: &SessionManager,
        document_id: &str,
        sender: &Identity,
        text: &str,
    ) -> Result<ChatMessage, CollabError> {
        let message = ChatMessage {
            id: Uuid::new_v4(),
            document_id: document_id.to_string(),
            user_id: sender.user_id.clone(),
            user_name: sender.display_name.clone(),
            text: text.to_string(),
            server_timestamp: now_millis(),
        };
        self.store
            .append(MessageRecord {
                id: message.id,
                user_id: message.user_id.clone(),
                user_name: message.user_name.clone(),
                document_id: message.document_id.clone(),
                message: message.text.clone(),
                created_at: message.server_timestamp,
            })
            .await
            .map_err(|e| CollabError::PersistenceFailure(e.to_string()))?;

        if let Some(room) = sessions.room(document_id).await {
            let frame = WireEvent::chat_echo(&message).encode()?;
            let delivered = room.publish(Outbound::broadcast(Arc::new(frame)));
            debug!("chat message {} delivered to {delivered} members", message.id);
        }
        Ok(message)
    }

    /// The most recent messages for a document, oldest first.
    pub async fn history(
        &self,
        document_id: &DocumentId,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, CollabError> {
        let mut records = self
            .store
            .recent(document_id, limit)
            .await
            .map_err(|e| match e {
                StoreError::NotFound => CollabError::NotFound,
                other => CollabError::PersistenceFailure(other.to_string()),
            })?;
        // The store pages newest first; readers want chronological order.
        records.reverse();
        Ok(records
            .into_iter()
            .map(|r| ChatMessage {
                id: r.id,
                document_id: r.document_id,
                user_id: r.user_id,
                user_name: r.user_name,
                text: r.message,
                server_timestamp: r.created_at,
            })
            .collect())
    }
}
