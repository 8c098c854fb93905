//! # scribe-collab — Real-time collaboration layer for Scribe
//!
//! Provides WebSocket-based multiplayer editing over a relay server.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐     WebSocket      ┌──────────────┐
//! │ CollabClient │ ◄─────────────────► │ CollabServer │
//! │ (per user)   │     JSON frames     │ (relay)      │
//! └──────┬───────┘                     └──────┬───────┘
//!        │                                    │
//!        ▼                                    ▼
//! ┌──────────────┐                     ┌──────────────┐
//! │ DocumentTree │                     │ SessionManager│
//! │ (replica)    │                     │ (rooms)      │
//! └──────────────┘                     └──────┬───────┘
//!                                             │
//!                                     ┌───────┴───────┐
//!                                     │ Stores        │
//!                                     │ (docs + chat) │
//!                                     └───────────────┘
//! ```
//!
//! The server holds no document replica. It verifies identity, routes
//! each `document_change` frame to the other members of the sender's
//! room unchanged, and persists chat before echoing it. Convergence
//! rests on every client applying every change exactly once.
//!
//! ## Modules
//!
//! - [`protocol`] — JSON wire protocol (tagged [`protocol::WireEvent`] frames)
//! - [`room`] — Room registry and per-room fan-out
//! - [`server`] — WebSocket relay server
//! - [`client`] — WebSocket client
//! - [`auth`] — Token verification at connect time
//! - [`chat`] — Persisted per-document chat
//! - [`docs`] — Owner-scoped document CRUD
//! - [`storage`] — Store traits and in-memory implementations

pub mod auth;
pub mod chat;
pub mod client;
pub mod docs;
pub mod error;
pub mod protocol;
pub mod room;
pub mod server;
pub mod storage;

// Re-exports for convenience
pub use auth::{Identity, StaticTokenVerifier, TokenVerifier};
pub use chat::ChatService;
pub use client::{CollabClient, CollabEvent, ConnectionState};
pub use docs::DocumentService;
pub use error::CollabError;
pub use protocol::{ChatMessage, DocumentId, ErrorCode, Participant, WireEvent};
pub use room::{JoinOutcome, Outbound, Room, SessionManager};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use storage::{
    DocumentRecord, DocumentStore, FailingMessageStore, MemoryDocumentStore, MemoryMessageStore,
    MessageRecord, MessageStore, StoreError,
};
