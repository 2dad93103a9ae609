//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::ServerError;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup, before any metric is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, ServerError> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// A handle backed by a recorder that is not installed globally.
///
/// Renders an empty exposition; used by tests and embedders that bring
/// their own recorder.
pub fn detached_handle() -> PrometheusHandle {
    PrometheusBuilder::new().build_recorder().handle()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Connection lifetime (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "ws_connection_duration_seconds";
/// Refused upgrades and gate closures (counter, labels: stage).
pub const WS_AUTH_FAILURES_TOTAL: &str = "ws_auth_failures_total";
/// Outbound messages dropped on a full or closed queue (counter).
pub const WS_SEND_DROPS_TOTAL: &str = "ws_send_drops_total";
/// Decoded inbound events (counter, labels: event).
pub const STEM_EVENTS_TOTAL: &str = "stem_events_total";
/// Frames rejected with `stem.error` (counter, labels: code).
pub const STEM_PROTOCOL_ERRORS_TOTAL: &str = "stem_protocol_errors_total";
/// Targeted commands with no live rank to deliver to (counter).
pub const STEM_COMMANDS_DROPPED_TOTAL: &str = "stem_commands_dropped_total";
/// Users with at least one registered worker (gauge).
pub const STEM_USERS_ACTIVE: &str = "stem_users_active";
/// Registered workers across all users (gauge).
pub const STEM_WORKERS_ACTIVE: &str = "stem_workers_active";
