//! `StemServer`: Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use stem_auth::IdentityProvider;
use stem_core::ConnectionId;
use stem_settings::ServerSettings;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::context::{Peer, StemContext};
use crate::errors::ServerError;
use crate::health::{HealthResponse, ServingState};
use crate::metrics::WS_AUTH_FAILURES_TOTAL;
use crate::registry::WorkerRegistry;
use crate::shutdown::ShutdownCoordinator;
use crate::transport::ConnectionHub;
use crate::websocket::credentials::{self, CredentialQuery};
use crate::websocket::session::{SessionConfig, run_ws_session};

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Registry, transport and identity provider.
    pub ctx: StemContext,
    /// Live connections.
    pub hub: Arc<ConnectionHub>,
    /// Shutdown coordinator.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// When the server started.
    pub start_time: Instant,
    /// Per-session transport tuning.
    pub session: SessionConfig,
    /// Largest inbound WebSocket message accepted.
    pub max_message_size: usize,
    /// Renders `/metrics`.
    pub metrics: PrometheusHandle,
}

/// The STEM coordination server.
pub struct StemServer {
    settings: ServerSettings,
    ctx: StemContext,
    hub: Arc<ConnectionHub>,
    registry: Arc<WorkerRegistry>,
    shutdown: Arc<ShutdownCoordinator>,
    start_time: Instant,
    metrics: PrometheusHandle,
}

impl StemServer {
    /// Create a new server.
    pub fn new(
        settings: ServerSettings,
        identity: Arc<dyn IdentityProvider>,
        metrics: PrometheusHandle,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::new());
        let registry = Arc::new(WorkerRegistry::new());
        let ctx = StemContext {
            registry: registry.clone(),
            transport: hub.clone(),
            identity,
        };
        Self {
            settings,
            ctx,
            hub,
            registry,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
            metrics,
        }
    }

    /// Build the Axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            ctx: self.ctx.clone(),
            hub: self.hub.clone(),
            shutdown: self.shutdown.clone(),
            start_time: self.start_time,
            session: SessionConfig::from_settings(&self.settings),
            max_message_size: self.settings.max_message_size,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.settings.ws_path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and serve until shutdown.
    ///
    /// Returns the bound address (useful with port 0) and the serve task.
    pub async fn listen(&self) -> Result<(SocketAddr, JoinHandle<()>), ServerError> {
        let addr = format!("{}:{}", self.settings.host, self.settings.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, ws_path = %self.settings.ws_path, "stem server listening");

        let router = self.router();
        let token = self.shutdown.token();
        let handle = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = result {
                error!(error = %e, "server error");
            }
        });

        Ok((local_addr, handle))
    }

    /// Get the connection hub.
    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    /// Get the worker registry.
    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }

    /// Get the server settings.
    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }
}

/// GET `{ws_path}`: authenticate, then upgrade.
///
/// Credentials are resolved before the upgrade so a bad token gets a plain
/// HTTP 401 and never reaches the registry.
async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<CredentialQuery>,
    headers: HeaderMap,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_shutting_down() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }

    let Some(creds) = credentials::extract(&query, &headers) else {
        warn!("upgrade refused, no credentials");
        counter!(WS_AUTH_FAILURES_TOTAL, "stage" => "connect").increment(1);
        return (StatusCode::UNAUTHORIZED, "missing credentials").into_response();
    };

    let identity = match state.ctx.identity.resolve(&creds).await {
        Ok(identity) => identity,
        Err(e) => {
            warn!(error = %e, provider = state.ctx.identity.name(), "upgrade refused");
            counter!(WS_AUTH_FAILURES_TOTAL, "stage" => "connect").increment(1);
            return (StatusCode::UNAUTHORIZED, "invalid credentials").into_response();
        }
    };

    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    let peer = Peer::new(ConnectionId::generate(), identity.user_id);
    let AppState {
        ctx,
        hub,
        shutdown,
        session,
        max_message_size,
        ..
    } = state;
    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| {
            shutdown.track(run_ws_session(
                socket,
                peer,
                creds,
                ctx,
                hub,
                session,
                shutdown.token(),
            ))
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::new(
        state.start_time,
        ServingState::from_shutdown(state.shutdown.is_shutting_down()),
        state.hub.connection_count(),
        state.ctx.registry.user_count(),
        state.ctx.registry.worker_count(),
    ))
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
