//! WebSocket client for connecting to the relay server.
//!
//! Provides:
//! - Connection lifecycle (connect, authenticate, disconnect)
//! - Joining and leaving document rooms
//! - Publishing local operations and receiving remote ones
//! - Chat send/receive and presence updates
//!
//! There is no offline queue: an edit made while disconnected is never
//! replayed later, because the relay carries no history and a stale
//! change against a moved-on document would corrupt every replica.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, RwLock};
use tokio_tungstenite::tungstenite::Message;

use scribe_doc::Operation;

use crate::error::CollabError;
use crate::protocol::{now_millis, ChatMessage, DocumentId, ErrorCode, Participant, WireEvent};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Events emitted by the client.
#[derive(Debug, Clone)]
pub enum CollabEvent {
    /// Connection established and authenticated
    Connected,
    /// Connection lost
    Disconnected,
    /// Operations produced by another member of our room
    RemoteChange {
        document_id: DocumentId,
        changes: Vec<Operation>,
        timestamp: u64,
    },
    /// A chat message, our own included
    Chat(ChatMessage),
    /// Full membership of our room after someone joined or left
    Presence {
        document_id: DocumentId,
        participants: Vec<Participant>,
    },
    /// An error frame from the server
    ServerError { code: ErrorCode, message: String },
}

/// A client connection to the relay server.
pub struct CollabClient {
    /// Bearer token presented on connect
    token: String,

    /// Connection state
    state: Arc<RwLock<ConnectionState>>,

    /// Channel to the WebSocket writer task
    outgoing_tx: Option<mpsc::Sender<String>>,

    /// Event receiver for the application
    event_rx: Option<mpsc::Receiver<CollabEvent>>,

    /// Event sender (held by the reader task)
    event_tx: mpsc::Sender<CollabEvent>,

    /// Server URL
    server_url: String,
}

impl CollabClient {
    pub fn new(server_url: impl Into<String>, token: impl Into<String>) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);
        Self {
            token: token.into(),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            outgoing_tx: None,
            event_rx: Some(event_rx),
            event_tx,
            server_url: server_url.into(),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.take()
    }

    /// Connect, authenticate, and spawn the reader/writer tasks.
    ///
    /// The token is sent as the first frame. [`CollabEvent::Connected`]
    /// is emitted only once the server acknowledges it; a rejected
    /// token surfaces as a [`CollabEvent::ServerError`] followed by
    /// [`CollabEvent::Disconnected`] without ever reaching `Connected`.
    pub async fn connect(&mut self) -> Result<(), CollabError> {
        *self.state.write().await = ConnectionState::Connecting;

        let (ws_stream, _) = tokio_tungstenite::connect_async(&self.server_url)
            .await
            .map_err(|_| CollabError::ConnectionClosed)?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        // Writer task: forward the outgoing channel to the WebSocket.
        // Frames keep their channel order, so our own edits arrive at
        // the server in the order we made them.
        let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
        self.outgoing_tx = Some(out_tx);
        tokio::spawn(async move {
            while let Some(frame) = out_rx.recv().await {
                if ws_writer.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            // Channel closed: say goodbye so the server treats us as
            // having left immediately.
            let _ = ws_writer.send(Message::Close(None)).await;
        });

        self.send(WireEvent::Authenticate {
            token: self.token.clone(),
        })
        .await?;

        // Reader task: decode incoming frames into events. The state
        // stays Connecting until the server acknowledges the token.
        let event_tx = self.event_tx.clone();
        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        let event = match WireEvent::decode(text.as_str()) {
                            Ok(event) => event,
                            Err(e) => {
                                log::warn!("Undecodable frame from server: {e}");
                                continue;
                            }
                        };

                        let event = match event {
                            WireEvent::Authenticated { .. } => {
                                *state.write().await = ConnectionState::Connected;
                                Some(CollabEvent::Connected)
                            }
                            WireEvent::DocumentChange {
                                document_id,
                                changes,
                                timestamp,
                            } => Some(CollabEvent::RemoteChange {
                                document_id,
                                changes,
                                timestamp,
                            }),
                            WireEvent::ChatMessage {
                                document_id,
                                user_id,
                                user_name,
                                message,
                                id: Some(id),
                                server_timestamp: Some(server_timestamp),
                            } => Some(CollabEvent::Chat(ChatMessage {
                                id,
                                document_id,
                                user_id,
                                user_name,
                                text: message,
                                server_timestamp,
                            })),
                            WireEvent::Presence {
                                document_id,
                                participants,
                            } => Some(CollabEvent::Presence {
                                document_id,
                                participants,
                            }),
                            WireEvent::Error { code, message } => {
                                Some(CollabEvent::ServerError { code, message })
                            }
                            other => {
                                log::debug!("Ignoring server frame {other:?}");
                                None
                            }
                        };

                        if let Some(evt) = event {
                            let _ = event_tx.send(evt).await;
                        }
                    }
                    Ok(Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }

            // Connection lost
            *state.write().await = ConnectionState::Disconnected;
            let _ = event_tx.send(CollabEvent::Disconnected).await;
        });

        Ok(())
    }

    async fn send(&self, event: WireEvent) -> Result<(), CollabError> {
        let tx = self
            .outgoing_tx
            .as_ref()
            .ok_or(CollabError::ConnectionClosed)?;
        tx.send(event.encode()?)
            .await
            .map_err(|_| CollabError::ConnectionClosed)
    }

    /// Join a document room. The server moves us out of any previous
    /// room first; there is at most one room per connection.
    pub async fn join_document(&self, document_id: impl Into<DocumentId>) -> Result<(), CollabError> {
        self.send(WireEvent::JoinDocument {
            document_id: document_id.into(),
        })
        .await
    }

    pub async fn leave_document(
        &self,
        document_id: impl Into<DocumentId>,
    ) -> Result<(), CollabError> {
        self.send(WireEvent::LeaveDocument {
            document_id: document_id.into(),
        })
        .await
    }

    /// Publish the operations of one local edit. They are relayed to
    /// every other member of the room but never echoed back to us.
    pub async fn publish_changes(
        &self,
        document_id: impl Into<DocumentId>,
        changes: Vec<Operation>,
    ) -> Result<(), CollabError> {
        if changes.is_empty() {
            return Ok(());
        }
        self.send(WireEvent::DocumentChange {
            document_id: document_id.into(),
            changes,
            timestamp: now_millis(),
        })
        .await
    }

    /// Send a chat message. The persisted, server-stamped copy comes
    /// back as a [`CollabEvent::Chat`] like everyone else's.
    pub async fn send_chat(
        &self,
        document_id: impl Into<DocumentId>,
        user_id: impl Into<String>,
        user_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), CollabError> {
        self.send(WireEvent::ChatMessage {
            document_id: document_id.into(),
            user_id: user_id.into(),
            user_name: user_name.into(),
            message: message.into(),
            id: None,
            server_timestamp: None,
        })
        .await
    }

    /// Get the current connection state.
    pub async fn connection_state(&self) -> ConnectionState {
        *self.state.read().await
    }

    /// Drop the outgoing channel, which ends the writer task and closes
    /// the socket.
    pub fn close(&mut self) {
        self.outgoing_tx = None;
    }
}
