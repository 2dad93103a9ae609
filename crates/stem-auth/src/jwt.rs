//! HS256 JSON Web Token provider.
//!
//! Tokens carry the user id in `sub` and an optional `login`. Expiry is
//! checked on every resolve, so a session that outlives its token is cut off
//! at the next inbound frame.

use std::fmt;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::{Deserialize, Serialize};

use crate::errors::AuthError;
use crate::types::{Credentials, Identity, IdentityProvider};

/// Claims read from (and, in tests, written to) a token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Display login.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

/// Validates HS256 tokens signed with a shared secret.
pub struct JwtProvider {
    key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for JwtProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtProvider")
            .field("algorithms", &self.validation.algorithms)
            .field("leeway", &self.validation.leeway)
            .finish_non_exhaustive()
    }
}

impl JwtProvider {
    /// Create a provider. `issuer`, when set, must match the `iss` claim.
    pub fn new(secret: &[u8], issuer: Option<&str>, leeway_secs: u64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::Config("JWT secret is empty".into()));
        }
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = leeway_secs;
        validation.set_required_spec_claims(&["exp", "sub"]);
        if let Some(iss) = issuer {
            validation.set_issuer(&[iss]);
        }
        Ok(Self {
            key: DecodingKey::from_secret(secret),
            validation,
        })
    }
}

#[async_trait]
impl IdentityProvider for JwtProvider {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        if credentials.token().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        let data = decode::<Claims>(credentials.token(), &self.key, &self.validation).map_err(
            |e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            },
        )?;
        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".into()));
        }
        Ok(Identity {
            user_id: data.claims.sub.into(),
            login: data.claims.login,
        })
    }

    fn name(&self) -> &'static str {
        "jwt"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &[u8] = b"test-secret-with-enough-entropy";

    fn token(claims: &Claims, secret: &[u8]) -> Credentials {
        let raw = encode(&Header::default(), claims, &EncodingKey::from_secret(secret)).unwrap();
        Credentials::new(raw)
    }

    fn claims(sub: &str, exp_offset_secs: i64) -> Claims {
        Claims {
            sub: sub.to_string(),
            exp: chrono::Utc::now().timestamp() + exp_offset_secs,
            login: Some("alice".into()),
            iss: None,
        }
    }

    #[tokio::test]
    async fn valid_token_resolves() {
        let provider = JwtProvider::new(SECRET, None, 0).unwrap();
        let id = provider
            .resolve(&token(&claims("u1", 3600), SECRET))
            .await
            .unwrap();
        assert_eq!(id.user_id.as_str(), "u1");
        assert_eq!(id.login.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn expired_token_rejected() {
        let provider = JwtProvider::new(SECRET, None, 30).unwrap();
        let err = provider
            .resolve(&token(&claims("u1", -3600), SECRET))
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::Expired);
    }

    #[tokio::test]
    async fn wrong_secret_rejected() {
        let provider = JwtProvider::new(SECRET, None, 0).unwrap();
        let err = provider
            .resolve(&token(&claims("u1", 3600), b"other-secret"))
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::InvalidToken(_));
    }

    #[tokio::test]
    async fn issuer_mismatch_rejected() {
        let provider = JwtProvider::new(SECRET, Some("girder"), 0).unwrap();
        let mut c = claims("u1", 3600);
        c.iss = Some("elsewhere".into());
        assert!(provider.resolve(&token(&c, SECRET)).await.is_err());

        c.iss = Some("girder".into());
        assert!(provider.resolve(&token(&c, SECRET)).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_token_rejected() {
        let provider = JwtProvider::new(SECRET, None, 0).unwrap();
        let err = provider
            .resolve(&Credentials::new("not.a.jwt"))
            .await
            .unwrap_err();
        assert_matches!(err, AuthError::InvalidToken(_));
    }

    #[test]
    fn empty_secret_is_config_error() {
        assert_matches!(JwtProvider::new(b"", None, 0), Err(AuthError::Config(_)));
    }

    #[test]
    fn debug_omits_secret() {
        let provider = JwtProvider::new(SECRET, None, 15).unwrap();
        let shown = format!("{provider:?}");
        assert!(shown.contains("leeway: 15"));
        assert!(!shown.contains("test-secret"));
    }
}
