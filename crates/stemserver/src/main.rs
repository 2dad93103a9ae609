//! # stemserver
//!
//! Server binary: loads settings, builds the identity provider and serves
//! the STEM WebSocket endpoint until Ctrl-C.

#![deny(unsafe_code)]

mod logging;

use std::path::PathBuf;

use anyhow::{Context, Result, ensure};
use clap::Parser;
use stem_server::StemServer;
use stem_settings::StemSettings;

/// STEM worker coordination server.
#[derive(Parser, Debug)]
#[command(name = "stemserver", version, about = "STEM worker coordination server")]
struct Cli {
    /// Settings file (defaults to `~/.stemserver/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `stem_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// Layer command-line flags over loaded settings.
    fn apply(&self, settings: &mut StemSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }

    /// Load file and env layers, apply flags, then validate once.
    ///
    /// An explicit `--config` must exist; only the default path may be absent.
    fn resolve_settings(&self) -> Result<(PathBuf, StemSettings)> {
        let path = match &self.config {
            Some(path) => {
                ensure!(path.exists(), "Settings file {} does not exist", path.display());
                path.clone()
            }
            None => stem_settings::settings_path(),
        };
        let mut settings = stem_settings::load_layers(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?;
        self.apply(&mut settings);
        settings.validate().context("Invalid settings")?;
        Ok((path, settings))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let (settings_path, settings) = args.resolve_settings()?;

    logging::init_subscriber(&settings.logging.level, settings.logging.json);
    tracing::info!(
        path = %settings_path.display(),
        auth_mode = ?settings.auth.mode,
        "settings loaded"
    );

    let metrics = stem_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let identity =
        stem_auth::build_provider(&settings.auth).context("Failed to build identity provider")?;
    tracing::info!(provider = identity.name(), "identity provider ready");

    let server = StemServer::new(settings.server, identity, metrics);
    let (addr, handle) = server.listen().await.context("Failed to start server")?;
    tracing::info!(%addr, "stemserver ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    tracing::info!("shutdown signal received");

    if !server.shutdown().drain(handle, None).await {
        tracing::warn!("some sessions did not close in time");
    }
    tracing::info!("stemserver stopped");
    Ok(())
}
