//! Errors produced when applying operations to a document tree.

use thiserror::Error;

/// Failure modes of [`crate::ops::apply`].
///
/// `InvalidOperation` covers unresolvable paths and type mismatches
/// (e.g. text edits addressed at a block). `InvariantViolation` is
/// reserved for edits that were refused to keep a structural invariant
/// intact, such as deleting the last row of a table. In both cases the
/// input tree is left untouched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OpError {
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
}

impl OpError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidOperation(reason.into())
    }

    pub fn violation(reason: impl Into<String>) -> Self {
        Self::InvariantViolation(reason.into())
    }
}
