//! Credential extraction from the upgrade request.

use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use serde::Deserialize;
use stem_auth::{Credentials, GIRDER_TOKEN_HEADER};

/// Query parameters accepted on the WebSocket endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct CredentialQuery {
    /// Token passed as `?token=`.
    #[serde(default)]
    pub token: Option<String>,
}

/// Find the connection's token.
///
/// Checked in order: `?token=`, `Authorization: Bearer`, `Girder-Token`.
/// Blank values are skipped.
pub fn extract(query: &CredentialQuery, headers: &HeaderMap) -> Option<Credentials> {
    let non_empty = |s: &str| {
        let s = s.trim();
        (!s.is_empty()).then(|| s.to_owned())
    };

    query
        .token
        .as_deref()
        .and_then(non_empty)
        .or_else(|| {
            headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(bearer_token)
                .and_then(non_empty)
        })
        .or_else(|| {
            headers
                .get(GIRDER_TOKEN_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(non_empty)
        })
        .map(Credentials::new)
}

fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;
    scheme.eq_ignore_ascii_case("bearer").then_some(token)
}
