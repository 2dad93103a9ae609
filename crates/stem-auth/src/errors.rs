//! Auth error types.

/// Errors that can occur while resolving connection credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The connection presented no token at all.
    #[error("no credentials supplied")]
    MissingCredentials,

    /// Token is not known to the provider or failed signature checks.
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token was valid once but has expired.
    #[error("token expired")]
    Expired,

    /// Remote identity service refused the token.
    #[error("identity service rejected token ({status}): {message}")]
    Rejected {
        /// HTTP status code (0 if the service answered 2xx with no user).
        status: u16,
        /// Error description.
        message: String,
    },

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Provider settings are unusable.
    #[error("auth misconfigured: {0}")]
    Config(String),
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
