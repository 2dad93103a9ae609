//! Protocol error codes and error type.

// ── Error code constants ────────────────────────────────────────────

/// Frame was not valid JSON or lacked the `type` envelope field.
pub const PARSE_ERROR: &str = "PARSE_ERROR";
/// Event name is not part of the `stem.*` protocol.
pub const UNKNOWN_EVENT: &str = "UNKNOWN_EVENT";
/// Required payload field missing or of the wrong type.
pub const INVALID_PARAMS: &str = "INVALID_PARAMS";

/// Errors raised while decoding one inbound frame.
///
/// These are local to the offending frame: they never touch the registry
/// and never affect other connections.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Frame is not a JSON object with a string `type`.
    #[error("invalid frame: {0}")]
    Parse(#[from] serde_json::Error),

    /// Well-formed envelope naming an event the server does not handle.
    #[error("unknown event type: {0}")]
    UnknownEvent(String),

    /// Payload is missing a required field.
    #[error("{event}: missing required field '{field}'")]
    MissingField {
        /// Event being decoded.
        event: &'static str,
        /// Name of the absent field.
        field: &'static str,
    },

    /// Payload field present but unusable.
    #[error("{event}: {message}")]
    InvalidField {
        /// Event being decoded.
        event: &'static str,
        /// Description of what is wrong.
        message: String,
    },
}

impl ProtocolError {
    /// Machine-readable error code for this variant.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Parse(_) => PARSE_ERROR,
            Self::UnknownEvent(_) => UNKNOWN_EVENT,
            Self::MissingField { .. } | Self::InvalidField { .. } => INVALID_PARAMS,
        }
    }
}
