//! Credential and identity types plus the provider trait.

use std::fmt;

use async_trait::async_trait;
use stem_core::UserId;

use crate::errors::AuthError;

/// Token presented by a connection.
///
/// Captured once from the upgrade request and re-presented to the provider
/// on every inbound frame.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    token: String,
}

impl Credentials {
    /// Wrap a raw token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// The raw token.
    pub fn token(&self) -> &str {
        &self.token
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown: String = self.token.chars().take(4).collect();
        f.debug_struct("Credentials")
            .field("token", &format_args!("{shown}***"))
            .finish()
    }
}

/// Who a set of credentials belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    /// Owner id; partitions all registry state.
    pub user_id: UserId,
    /// Human-readable login, if the provider knows one.
    pub login: Option<String>,
}

impl Identity {
    /// Identity without a login name.
    pub fn new(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            login: None,
        }
    }
}

/// Resolves credentials to an identity.
///
/// Called at connect time and again before every inbound frame, so
/// implementations should be cheap on the hot path (cache remote lookups).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve `credentials` or explain why they are not acceptable.
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AuthError>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}
