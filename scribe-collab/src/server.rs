//! WebSocket relay server with room-based document routing.
//!
//! Architecture:
//! ```text
//! Client A ──┐
//!             ├── Room (document_id) ── broadcast channel
//! Client B ──┘          │
//!                       ├── MessageStore (chat history)
//!                       │
//!            ┌──────────┼───────────┐
//!            ▼          ▼           ▼
//!         Client A   Client B    Client C
//! ```
//!
//! The server never interprets document operations. A `document_change`
//! frame is validated as JSON and relayed byte-for-byte to every other
//! member of the sender's room; each client applies changes to its own
//! replica. Chat frames go through [`ChatService`] so they are persisted
//! before anyone, including the sender, sees them.
//!
//! Every connection must present a token in an `authenticate` frame
//! before anything else; the verified identity is then authoritative
//! for the lifetime of the connection.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::auth::TokenVerifier;
use crate::chat::ChatService;
use crate::error::CollabError;
use crate::protocol::WireEvent;
use crate::room::{Outbound, SessionManager};
use crate::storage::MessageStore;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per room
    pub broadcast_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub rejected_connections: u64,
    pub total_frames: u64,
    pub relayed_changes: u64,
    pub active_rooms: usize,
}

/// The relay server.
pub struct CollabServer {
    config: ServerConfig,
    sessions: Arc<SessionManager>,
    verifier: Arc<dyn TokenVerifier>,
    chat: Arc<ChatService>,
    stats: Arc<RwLock<ServerStats>>,
}

impl CollabServer {
    pub fn new(
        config: ServerConfig,
        verifier: Arc<dyn TokenVerifier>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(config.broadcast_capacity));
        Self {
            config,
            sessions,
            verifier,
            chat: Arc::new(ChatService::new(messages)),
            stats: Arc::new(RwLock::new(ServerStats::default())),
        }
    }

    /// The room registry, shared with every connection task.
    pub fn sessions(&self) -> Arc<SessionManager> {
        self.sessions.clone()
    }

    /// Get server statistics.
    pub async fn stats(&self) -> ServerStats {
        self.stats.read().await.clone()
    }

    /// Start listening for WebSocket connections.
    ///
    /// This runs the server event loop. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        log::info!("Relay server listening on {}", self.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("New TCP connection from {addr}");

            let sessions = self.sessions.clone();
            let verifier = self.verifier.clone();
            let chat = self.chat.clone();
            let stats = self.stats.clone();

            tokio::spawn(async move {
                if let Err(e) =
                    Self::handle_connection(stream, addr, sessions, verifier, chat, stats).await
                {
                    log::error!("Connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Handle a single WebSocket connection.
    async fn handle_connection(
        stream: TcpStream,
        addr: SocketAddr,
        sessions: Arc<SessionManager>,
        verifier: Arc<dyn TokenVerifier>,
        chat: Arc<ChatService>,
        stats: Arc<RwLock<ServerStats>>,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let ws_stream = tokio_tungstenite::accept_async(stream).await?;
        let (mut ws_sender, mut ws_receiver) = ws_stream.split();

        log::debug!("WebSocket connection established from {addr}");

        // Nothing else is accepted until the peer authenticates.
        let identity = loop {
            match ws_receiver.next().await {
                Some(Ok(Message::Text(text))) => {
                    match WireEvent::decode(text.as_str()) {
                        Ok(WireEvent::Authenticate { token }) => {
                            match verifier.verify(&token).await {
                                Some(identity) => break identity,
                                None => {
                                    let err = CollabError::Unauthorized;
                                    let frame = WireEvent::error(&err).encode()?;
                                    let _ = ws_sender.send(Message::Text(frame.into())).await;
                                    let _ = ws_sender.send(Message::Close(None)).await;
                                    stats.write().await.rejected_connections += 1;
                                    log::warn!("Rejected unauthenticated connection from {addr}");
                                    return Ok(());
                                }
                            }
                        }
                        _ => {
                            let err = CollabError::Protocol(
                                "expected authenticate as the first frame".to_string(),
                            );
                            let frame = WireEvent::error(&err).encode()?;
                            let _ = ws_sender.send(Message::Text(frame.into())).await;
                            let _ = ws_sender.send(Message::Close(None)).await;
                            stats.write().await.rejected_connections += 1;
                            return Ok(());
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    ws_sender.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Close(_))) | None => return Ok(()),
                Some(Err(e)) => return Err(e.into()),
                _ => {}
            }
        };

        let connection_id = Uuid::new_v4();
        log::info!(
            "Connection {connection_id} authenticated as {} ({addr})",
            identity.user_id
        );
        let ack = WireEvent::Authenticated {
            user_id: identity.user_id.clone(),
            display_name: identity.display_name.clone(),
        }
        .encode()?;
        ws_sender.send(Message::Text(ack.into())).await?;

        {
            let mut s = stats.write().await;
            s.total_connections += 1;
            s.active_connections += 1;
        }

        // At most one room at a time; `receiver` follows the membership.
        let mut receiver: Option<tokio::sync::broadcast::Receiver<Outbound>> = None;

        loop {
            tokio::select! {
                // Incoming WebSocket message
                msg = ws_receiver.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            stats.write().await.total_frames += 1;

                            let event = match WireEvent::decode(text.as_str()) {
                                Ok(event) => event,
                                Err(e) => {
                                    log::warn!("Undecodable frame from {connection_id}: {e}");
                                    let frame = WireEvent::error(&e).encode()?;
                                    ws_sender.send(Message::Text(frame.into())).await?;
                                    continue;
                                }
                            };

                            match event {
                                WireEvent::JoinDocument { document_id } => {
                                    let outcome = sessions
                                        .join(connection_id, &identity, &document_id)
                                        .await;
                                    receiver = Some(outcome.receiver);
                                    let mut s = stats.write().await;
                                    s.active_rooms = sessions.room_count().await;
                                    log::info!(
                                        "{} joined document {document_id}",
                                        identity.user_id
                                    );
                                }

                                WireEvent::LeaveDocument { document_id } => {
                                    if sessions.membership(connection_id).await.as_deref()
                                        == Some(document_id.as_str())
                                    {
                                        sessions.leave(connection_id).await;
                                        receiver = None;
                                        let mut s = stats.write().await;
                                        s.active_rooms = sessions.room_count().await;
                                        log::info!(
                                            "{} left document {document_id}",
                                            identity.user_id
                                        );
                                    }
                                }

                                WireEvent::DocumentChange { ref document_id, .. } => {
                                    // Relay the original frame untouched so every
                                    // member sees exactly what the sender produced.
                                    let joined = sessions
                                        .membership(connection_id)
                                        .await
                                        .as_deref()
                                        == Some(document_id.as_str());
                                    if !joined {
                                        let err = CollabError::Protocol(format!(
                                            "not joined to document {document_id}"
                                        ));
                                        let frame = WireEvent::error(&err).encode()?;
                                        ws_sender.send(Message::Text(frame.into())).await?;
                                        continue;
                                    }
                                    if let Some(room) = sessions.room(document_id).await {
                                        room.publish(Outbound::relay(
                                            connection_id,
                                            Arc::new(text.as_str().to_string()),
                                        ));
                                        stats.write().await.relayed_changes += 1;
                                    }
                                }

                                WireEvent::ChatMessage { document_id, message, .. } => {
                                    let joined = sessions
                                        .membership(connection_id)
                                        .await
                                        .as_deref()
                                        == Some(document_id.as_str());
                                    if !joined {
                                        let err = CollabError::Protocol(format!(
                                            "not joined to document {document_id}"
                                        ));
                                        let frame = WireEvent::error(&err).encode()?;
                                        ws_sender.send(Message::Text(frame.into())).await?;
                                        continue;
                                    }
                                    if let Err(e) = chat
                                        .send_message(&sessions, &document_id, &identity, &message)
                                        .await
                                    {
                                        // The failure stays between the server
                                        // and the sender.
                                        log::error!(
                                            "Chat persistence failed for {connection_id}: {e}"
                                        );
                                        let frame = WireEvent::error(&e).encode()?;
                                        ws_sender.send(Message::Text(frame.into())).await?;
                                    }
                                }

                                other => {
                                    log::debug!(
                                        "Unhandled frame from {connection_id}: {other:?}"
                                    );
                                }
                            }
                        }

                        Some(Ok(Message::Close(_))) | None => {
                            log::info!("Connection {connection_id} closed");
                            break;
                        }

                        Some(Ok(Message::Ping(data))) => {
                            ws_sender.send(Message::Pong(data)).await?;
                        }

                        Some(Err(e)) => {
                            log::error!("WebSocket error from {connection_id}: {e}");
                            break;
                        }

                        _ => {}
                    }
                }

                // Outgoing room traffic
                out = async {
                    if let Some(ref mut rx) = receiver {
                        rx.recv().await
                    } else {
                        // Not in a room — wait forever
                        std::future::pending().await
                    }
                } => {
                    match out {
                        Ok(out) => {
                            if out.exclude == Some(connection_id) {
                                continue; // Never echo a change to its sender
                            }
                            ws_sender
                                .send(Message::Text(out.frame.as_str().into()))
                                .await?;
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // At-most-once delivery: the dropped frames are gone.
                            log::warn!("Connection {connection_id} lagged by {n} frames");
                        }
                        Err(_) => {
                            receiver = None;
                        }
                    }
                }
            }
        }

        // A dropped socket counts as leaving, with no grace period.
        sessions.leave(connection_id).await;
        {
            let mut s = stats.write().await;
            s.active_connections -= 1;
            s.active_rooms = sessions.room_count().await;
        }

        Ok(())
    }
}
