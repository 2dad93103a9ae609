//! Fixed token table, for development and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use stem_core::UserId;

use crate::errors::AuthError;
use crate::types::{Credentials, Identity, IdentityProvider};

/// Maps bearer tokens to user ids from configuration.
#[derive(Debug, Default)]
pub struct StaticTokenProvider {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenProvider {
    /// Build from `(token, user)` pairs.
    pub fn new<I, T, U>(entries: I) -> Self
    where
        I: IntoIterator<Item = (T, U)>,
        T: Into<String>,
        U: Into<UserId>,
    {
        Self {
            tokens: entries
                .into_iter()
                .map(|(t, u)| (t.into(), u.into()))
                .collect(),
        }
    }

    /// Number of configured tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether no tokens are configured.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[async_trait]
impl IdentityProvider for StaticTokenProvider {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        if credentials.token().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        self.tokens
            .get(credentials.token())
            .map(|user| Identity::new(user.clone()))
            .ok_or_else(|| AuthError::InvalidToken("unknown token".into()))
    }

    fn name(&self) -> &'static str {
        "static"
    }
}
