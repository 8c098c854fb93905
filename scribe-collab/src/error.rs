//! Collaboration-layer error taxonomy.
//!
//! `Unauthorized`/`NotFound`/`Forbidden` are always surfaced to the
//! caller, never swallowed. `PersistenceFailure` aborts the operation
//! that needed the store (a chat message that fails to persist is not
//! broadcast). Transport disconnects are not errors at this layer —
//! they are leave events.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CollabError {
    /// Missing or invalid identity token at connection time.
    #[error("unauthorized")]
    Unauthorized,
    /// Referenced document or message does not exist.
    #[error("not found")]
    NotFound,
    /// Caller is not the document owner.
    #[error("forbidden")]
    Forbidden,
    /// An external store call failed; the triggering operation is
    /// reported failed and not retried here.
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("connection closed")]
    ConnectionClosed,
}
