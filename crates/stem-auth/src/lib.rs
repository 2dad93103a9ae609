//! # stem-auth
//!
//! Identity providers that turn a connection's token into the user id all
//! registry state is partitioned by.
//!
//! Three providers, selected by `auth.mode`:
//! - **static**: fixed token table from settings (development)
//! - **jwt**: HS256 tokens with `sub` = user id
//! - **girder**: session tokens checked against a Girder server's
//!   `/user/me`, cached per token

#![deny(unsafe_code)]

pub mod errors;
pub mod girder;
pub mod jwt;
pub mod static_token;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use stem_settings::{AuthMode, AuthSettings};

pub use errors::AuthError;
pub use girder::{GIRDER_TOKEN_HEADER, GirderProvider};
pub use jwt::{Claims, JwtProvider};
pub use static_token::StaticTokenProvider;
pub use types::{Credentials, Identity, IdentityProvider};

/// Build the provider selected by `settings.mode`.
pub fn build_provider(settings: &AuthSettings) -> Result<Arc<dyn IdentityProvider>, AuthError> {
    let provider: Arc<dyn IdentityProvider> = match settings.mode {
        AuthMode::Static => {
            let provider = StaticTokenProvider::new(
                settings
                    .tokens
                    .iter()
                    .map(|(token, user)| (token.clone(), user.clone())),
            );
            if provider.is_empty() {
                tracing::warn!("static auth mode with no tokens configured; every connection will be refused");
            }
            Arc::new(provider)
        }
        AuthMode::Jwt => Arc::new(JwtProvider::new(
            settings.jwt.secret.as_bytes(),
            settings.jwt.issuer.as_deref(),
            settings.jwt.leeway_secs,
        )?),
        AuthMode::Girder => Arc::new(GirderProvider::new(
            &settings.girder.api_url,
            Duration::from_secs(settings.girder.cache_ttl_secs),
            Duration::from_millis(settings.girder.timeout_ms),
        )?),
    };
    Ok(provider)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
