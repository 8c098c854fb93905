//! Identity verification seam.
//!
//! Credential issuance lives in an external auth service; this layer
//! only consumes an opaque token once, at connection establishment, and
//! maps it to an [`Identity`] or refuses the connection.

use std::collections::HashMap;

use async_trait::async_trait;

/// The verified identity behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Verifies an opaque identity token.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// `None` means the token is missing, expired, or forged; the
    /// connection is refused and no session state is created.
    async fn verify(&self, token: &str) -> Option<Identity>;
}

/// Map-backed verifier for local use and tests.
#[derive(Debug, Default)]
pub struct StaticTokenVerifier {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenVerifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(
        mut self,
        token: impl Into<String>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        self.tokens
            .insert(token.into(), Identity::new(user_id, display_name));
        self
    }
}

#[async_trait]
impl TokenVerifier for StaticTokenVerifier {
    async fn verify(&self, token: &str) -> Option<Identity> {
        self.tokens.get(token).cloned()
    }
}
