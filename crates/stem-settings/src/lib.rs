//! # stem-settings
//!
//! Configuration management with layered sources for stemserver.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`StemSettings::default()`]
//! 2. **Settings file**: `~/.stemserver/settings.json` or an explicit path
//!    (deep-merged over defaults)
//! 3. **Environment variables**: `STEM_*` overrides (highest priority)
//!
//! The binary applies CLI flags on top of the loaded value.
//!
//! # Usage
//!
//! ```no_run
//! use stem_settings::load_settings;
//!
//! let settings = load_settings().unwrap_or_default();
//! println!("listening on {}:{}", settings.server.host, settings.server.port);
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, apply_overrides_from, deep_merge, load_layers, load_settings,
    load_settings_from_path, settings_path,
};
pub use types::*;
