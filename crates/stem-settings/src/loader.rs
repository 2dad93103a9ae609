//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`StemSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `STEM_*` environment variable overrides (highest priority)
//! 4. Validate cross-field constraints (skipped by [`load_layers`])
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::{AuthMode, StemSettings};

/// Resolve the path to the settings file (`~/.stemserver/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".stemserver").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<StemSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, defaults are used. Invalid JSON or a value
/// failing [`StemSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<StemSettings> {
    let settings = load_layers(path)?;
    settings.validate()?;
    Ok(settings)
}

/// File and environment layers without validation.
///
/// For callers that stack further overrides (command-line flags) and then
/// call [`StemSettings::validate`] themselves.
pub fn load_layers(path: &Path) -> Result<StemSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<StemSettings> {
    let defaults = serde_json::to_value(StemSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
///
/// - Objects are merged recursively (source overrides target per-key)
/// - Arrays and primitives are replaced entirely by source
/// - Null values in source are skipped (preserving target)
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut StemSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply `STEM_*` overrides read through `lookup`.
///
/// Each variable has strict parsing rules:
/// - Integers must be valid and within the specified range
/// - Booleans accept: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`
/// - Invalid values are ignored with a warning (fall back to file/default)
pub fn apply_overrides_from<F>(settings: &mut StemSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    // ── Server settings ─────────────────────────────────────────────
    if let Some(v) = env.string("STEM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.u16("STEM_PORT", 0, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = env.string("STEM_WS_PATH") {
        settings.server.ws_path = v;
    }
    if let Some(v) = env.usize("STEM_SEND_QUEUE_SIZE", 1, 1_048_576) {
        settings.server.send_queue_size = v;
    }
    if let Some(v) = env.u64("STEM_PING_INTERVAL_MS", 100, 600_000) {
        settings.server.ping_interval_ms = v;
    }
    if let Some(v) = env.u64("STEM_PONG_TIMEOUT_MS", 100, 3_600_000) {
        settings.server.pong_timeout_ms = v;
    }

    // ── Auth settings ───────────────────────────────────────────────
    if let Some(v) = env.string("STEM_AUTH_MODE") {
        match serde_json::from_value::<AuthMode>(Value::String(v.to_lowercase())) {
            Ok(mode) => settings.auth.mode = mode,
            Err(_) => tracing::warn!(key = "STEM_AUTH_MODE", value = %v, "invalid auth mode, ignoring"),
        }
    }
    if let Some(v) = env.string("STEM_JWT_SECRET") {
        settings.auth.jwt.secret = v;
    }
    if let Some(v) = env.string("STEM_JWT_ISSUER") {
        settings.auth.jwt.issuer = Some(v);
    }
    if let Some(v) = env.string("STEM_GIRDER_API_URL") {
        settings.auth.girder.api_url = v;
    }
    if let Some(v) = env.u64("STEM_GIRDER_CACHE_TTL_SECS", 0, 86_400) {
        settings.auth.girder.cache_ttl_secs = v;
    }

    // ── Logging settings ────────────────────────────────────────────
    if let Some(v) = env.string("STEM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.bool("STEM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

// ── Variable readers (thin wrappers) ────────────────────────────────────────

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn bool(&self, name: &str) -> Option<bool> {
        let val = (self.lookup)(name)?;
        let result = parse_bool(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid boolean env var, ignoring");
        }
        result
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        let val = (self.lookup)(name)?;
        let result = parse_u16_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u16 env var, ignoring");
        }
        result
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        let val = (self.lookup)(name)?;
        let result = parse_u64_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid u64 env var, ignoring");
        }
        result
    }

    fn usize(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        let val = (self.lookup)(name)?;
        let result = parse_usize_range(&val, min, max);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, "invalid usize env var, ignoring");
        }
        result
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
