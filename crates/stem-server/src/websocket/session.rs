//! WebSocket session lifecycle: one authenticated connection from upgrade
//! through disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use stem_auth::Credentials;
use stem_settings::ServerSettings;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::context::{Peer, StemContext};
use crate::gate::{self, CLOSE_UNAUTHORIZED, ConnectionState};
use crate::lifecycle;
use crate::metrics::{
    WS_AUTH_FAILURES_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_DISCONNECTIONS_TOTAL,
};
use crate::router;
use crate::transport::{ClientConnection, ConnectionHub, GroupTransport};

/// Close code sent when the server is shutting down.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// How long to wait for the writer to flush its Close frame.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

/// Per-session transport tuning.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Outbound queue capacity.
    pub send_queue_size: usize,
    /// Interval between server Ping frames.
    pub ping_interval: Duration,
    /// Disconnect after this long without a Pong.
    pub pong_timeout: Duration,
}

impl SessionConfig {
    /// Take transport settings from the server section.
    pub fn from_settings(settings: &ServerSettings) -> Self {
        Self {
            send_queue_size: settings.send_queue_size.max(1),
            ping_interval: Duration::from_millis(settings.ping_interval_ms),
            pong_timeout: Duration::from_millis(settings.pong_timeout_ms),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from_settings(&ServerSettings::default())
    }
}

/// Run a WebSocket session for an authenticated connection.
///
/// 1. Registers the connection and sends the user's `stem.workers` snapshot
/// 2. Runs every inbound text frame through the auth gate, then the router
/// 3. Forwards queued outbound frames and sends periodic Pings
/// 4. On exit releases the connection's rank slots and tells the group
#[instrument(skip_all, fields(conn_id = %peer.conn_id, user_id = %peer.user_id))]
pub async fn run_ws_session(
    ws: WebSocket,
    peer: Peer,
    credentials: Credentials,
    ctx: StemContext,
    hub: Arc<ConnectionHub>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = ws.split();
    let mut state = ConnectionState::Pending;

    let (send_tx, send_rx) = mpsc::channel::<Arc<str>>(config.send_queue_size);
    let connection = Arc::new(ClientConnection::new(
        peer.conn_id.clone(),
        peer.user_id.clone(),
        send_tx,
    ));

    let connection_start = Instant::now();
    info!("client connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

    hub.register(connection.clone());
    let mut writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        connection.clone(),
        config.clone(),
        shutdown,
    ));

    if lifecycle::connect(&ctx, &peer) {
        let _ = state.authenticate();
    } else {
        warn!("could not deliver initial snapshot");
        state.close();
    }

    while state.is_authenticated() {
        let next = tokio::select! {
            msg = ws_rx.next() => msg,
            () = connection.closed() => break,
        };
        let Some(Ok(msg)) = next else { break };

        let text = match msg {
            Message::Text(t) => t.as_str().to_owned(),
            Message::Binary(data) => {
                if let Ok(s) = std::str::from_utf8(&data) {
                    s.to_owned()
                } else {
                    debug!(len = data.len(), "ignoring non-UTF8 binary frame");
                    continue;
                }
            }
            Message::Close(_) => {
                debug!("client sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.touch();
                continue;
            }
        };
        connection.touch();

        if let Err(rejection) = gate::check(ctx.identity.as_ref(), &credentials, &peer.user_id).await
        {
            warn!(error = %rejection, "closing connection, credentials rejected");
            counter!(WS_AUTH_FAILURES_TOTAL, "stage" => "frame").increment(1);
            hub.close(&peer.conn_id, CLOSE_UNAUTHORIZED, "unauthorized");
            state.close();
            break;
        }

        router::handle_text(&ctx, &peer, &text);
    }
    state.close();

    // Clean up
    let _ = lifecycle::disconnect(&ctx, &peer);
    let _ = hub.unregister(&peer.conn_id);
    connection.mark_closed();
    if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, &mut writer)
        .await
        .is_err()
    {
        writer.abort();
    }

    info!(
        dropped = connection.dropped(),
        age_ms = u64::try_from(connection.age().as_millis()).unwrap_or(u64::MAX),
        "client disconnected"
    );
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection_start.elapsed().as_secs_f64());
}

/// Drain the outbound queue onto the socket, ping periodically, and send a
/// Close frame once the connection is closed.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<str>>,
    connection: Arc<ClientConnection>,
    config: SessionConfig,
    shutdown: CancellationToken,
) {
    let mut ping_interval = tokio::time::interval(config.ping_interval);
    // Skip the immediate first tick
    let _ = ping_interval.tick().await;

    loop {
        tokio::select! {
            biased;
            () = connection.closed() => break,
            () = shutdown.cancelled() => {
                connection.close(CLOSE_GOING_AWAY, "server shutting down");
                break;
            }
            msg = send_rx.recv() => {
                let Some(text) = msg else { break };
                if ws_tx.send(Message::Text(String::from(&*text).into())).await.is_err() {
                    break;
                }
            }
            _ = ping_interval.tick() => {
                if connection.idle_for() > config.pong_timeout {
                    warn!(timeout = ?config.pong_timeout, "client unresponsive, disconnecting");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let frame = connection.close_request().map(|req| CloseFrame {
        code: req.code,
        reason: req.reason.into(),
    });
    let _ = ws_tx.send(Message::Close(frame)).await;
    connection.mark_closed();
}
