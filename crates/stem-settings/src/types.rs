//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it wants to change. Each type implements
//! [`Default`] with production defaults.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8080 },
///   "auth": { "mode": "girder", "girder": { "apiUrl": "http://girder:8080/api/v1" } }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StemSettings {
    /// Network and WebSocket transport settings.
    pub server: ServerSettings,
    /// Identity provider selection and parameters.
    pub auth: AuthSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl StemSettings {
    /// Check cross-field constraints the type system cannot express.
    pub fn validate(&self) -> Result<()> {
        let server = &self.server;
        if !server.ws_path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.wsPath must start with '/': {}",
                server.ws_path
            )));
        }
        if server.send_queue_size == 0 {
            return Err(SettingsError::InvalidValue(
                "server.sendQueueSize must be at least 1".into(),
            ));
        }
        if server.ping_interval_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.pingIntervalMs must be positive".into(),
            ));
        }
        if server.pong_timeout_ms < server.ping_interval_ms {
            return Err(SettingsError::InvalidValue(format!(
                "server.pongTimeoutMs ({}) must be >= server.pingIntervalMs ({})",
                server.pong_timeout_ms, server.ping_interval_ms
            )));
        }
        match self.auth.mode {
            AuthMode::Static => {}
            AuthMode::Jwt if self.auth.jwt.secret.is_empty() => {
                return Err(SettingsError::InvalidValue(
                    "auth.jwt.secret is required when auth.mode is \"jwt\"".into(),
                ));
            }
            AuthMode::Jwt => {}
            AuthMode::Girder if self.auth.girder.api_url.is_empty() => {
                return Err(SettingsError::InvalidValue(
                    "auth.girder.apiUrl is required when auth.mode is \"girder\"".into(),
                ));
            }
            AuthMode::Girder => {}
        }
        Ok(())
    }
}

/// Server network and transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` to auto-assign).
    pub port: u16,
    /// Route of the WebSocket endpoint.
    pub ws_path: String,
    /// Per-connection outbound queue capacity; a full queue drops messages.
    pub send_queue_size: usize,
    /// Interval between server Ping frames, in milliseconds.
    pub ping_interval_ms: u64,
    /// Close a connection after this long without a Pong, in milliseconds.
    pub pong_timeout_ms: u64,
    /// Max WebSocket message size in bytes.
    pub max_message_size: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 5000,
            ws_path: "/stem".to_string(),
            send_queue_size: 1024,
            ping_interval_ms: 30_000,
            pong_timeout_ms: 60_000,
            max_message_size: 64 * 1024 * 1024, // 64 MB, frame data can be large
        }
    }
}

/// Which identity provider resolves connection credentials.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthMode {
    /// Fixed token table from [`AuthSettings::tokens`].
    #[default]
    Static,
    /// HS256 JSON Web Tokens.
    Jwt,
    /// Girder session tokens checked against a Girder server.
    Girder,
}

/// Identity provider settings.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Active provider.
    pub mode: AuthMode,
    /// Static mode: bearer token → user id.
    pub tokens: BTreeMap<String, String>,
    /// JWT mode parameters.
    pub jwt: JwtSettings,
    /// Girder mode parameters.
    pub girder: GirderSettings,
}

/// JWT validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JwtSettings {
    /// Shared HMAC secret.
    pub secret: String,
    /// Required `iss` claim, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Clock skew tolerated on `exp`, in seconds.
    pub leeway_secs: u64,
}

impl Default for JwtSettings {
    fn default() -> Self {
        Self {
            secret: String::new(),
            issuer: None,
            leeway_secs: 30,
        }
    }
}

/// Girder identity lookup settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GirderSettings {
    /// Base API URL, e.g. `http://localhost:8080/api/v1`.
    pub api_url: String,
    /// How long a resolved token is trusted before re-checking, in seconds.
    pub cache_ttl_secs: u64,
    /// HTTP request timeout in milliseconds.
    pub timeout_ms: u64,
}

impl Default for GirderSettings {
    fn default() -> Self {
        Self {
            api_url: String::new(),
            cache_ttl_secs: 60,
            timeout_ms: 10_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
