//! End-to-end tests against a real listener with WebSocket clients.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use stem_auth::{AuthError, Credentials, Identity, IdentityProvider, StaticTokenProvider};
use stem_server::StemServer;
use stem_server::metrics::detached_handle;
use stem_settings::ServerSettings;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

const TIMEOUT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Accepts any non-empty token as `alice` until revoked.
#[derive(Default)]
struct RevocableProvider {
    revoked: AtomicBool,
}

impl RevocableProvider {
    fn revoke(&self) {
        self.revoked.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl IdentityProvider for RevocableProvider {
    async fn resolve(&self, credentials: &Credentials) -> Result<Identity, AuthError> {
        if credentials.token().is_empty() {
            return Err(AuthError::MissingCredentials);
        }
        if self.revoked.load(Ordering::SeqCst) {
            return Err(AuthError::Expired);
        }
        Ok(Identity::new("alice"))
    }

    fn name(&self) -> &'static str {
        "revocable"
    }
}

/// Boot a test server and return its WS base URL.
async fn boot_server() -> (String, Arc<StemServer>) {
    boot_with(Arc::new(StaticTokenProvider::new([
        ("tok-alice", "alice"),
        ("tok-bob", "bob"),
    ])))
    .await
}

async fn boot_with(identity: Arc<dyn IdentityProvider>) -> (String, Arc<StemServer>) {
    let settings = ServerSettings {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerSettings::default()
    };
    let server = Arc::new(StemServer::new(settings, identity, detached_handle()));
    let (addr, _handle) = server.listen().await.unwrap();
    (format!("ws://{addr}/stem"), server)
}

/// Connect with `?token=` and consume the initial `stem.workers` snapshot.
async fn connect(url: &str, token: &str) -> (WsStream, Value) {
    let (mut ws, _) = connect_async(format!("{url}?token={token}")).await.unwrap();
    let snapshot = read_json(&mut ws).await;
    assert_eq!(snapshot["type"], "stem.workers");
    (ws, snapshot["data"].clone())
}

async fn send(ws: &mut WsStream, event: &str, data: Value) {
    let text = json!({"type": event, "data": data}).to_string();
    ws.send(Message::Text(text.into())).await.unwrap();
}

/// Read the next text frame as JSON, skipping control frames.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        match msg {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => {}
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

/// Read until a `stem.workers` frame arrives and return its data.
async fn read_workers(ws: &mut WsStream) -> Value {
    let frame = read_json(ws).await;
    assert_eq!(frame["type"], "stem.workers", "got {frame}");
    frame["data"].clone()
}

/// Assert no text frame arrives for a short while.
async fn expect_silence(ws: &mut WsStream) {
    match timeout(QUIET, ws.next()).await {
        Err(_) => {}
        Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => {}
        Ok(other) => panic!("expected silence, got {other:?}"),
    }
}

async fn announce(ws: &mut WsStream, worker: &str, rank: u32) {
    send(
        ws,
        "stem.worker_connected",
        json!({"id": worker, "rank": rank, "pipelines": [{"name": "sum"}]}),
    )
    .await;
}

fn rank_count(workers: &Value, worker: &str) -> usize {
    workers[worker]["ranks"].as_object().map_or(0, serde_json::Map::len)
}

/// W1 ranks {0: A, 1: B} plus client C, all for alice.
async fn alice_fleet(url: &str) -> (WsStream, WsStream, WsStream) {
    let (mut a, _) = connect(url, "tok-alice").await;
    let (mut b, _) = connect(url, "tok-alice").await;
    let (mut c, _) = connect(url, "tok-alice").await;

    announce(&mut a, "w1", 0).await;
    for ws in [&mut a, &mut b, &mut c] {
        let _ = read_workers(ws).await;
    }
    announce(&mut b, "w1", 1).await;
    for ws in [&mut a, &mut b, &mut c] {
        let workers = read_workers(ws).await;
        assert_eq!(rank_count(&workers, "w1"), 2);
    }
    (a, b, c)
}

#[tokio::test]
async fn connect_receives_empty_snapshot() {
    let (url, server) = boot_server().await;
    let (_ws, snapshot) = connect(&url, "tok-alice").await;
    assert_eq!(snapshot, json!({}));
    assert_eq!(server.hub().connection_count(), 1);
}

#[tokio::test]
async fn late_joiner_sees_registered_workers() {
    let (url, _server) = boot_server().await;
    let (_a, _b, _c) = alice_fleet(&url).await;

    let (_d, snapshot) = connect(&url, "tok-alice").await;
    assert_eq!(rank_count(&snapshot, "w1"), 2);
    assert_eq!(snapshot["w1"]["pipelines"], json!([{"name": "sum"}]));
}

#[tokio::test]
async fn execute_fans_out_to_ranks_only() {
    let (url, _server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    let payload = json!({"workerId": "w1", "pipelineId": "p1", "params": {"x": 1}});
    send(&mut c, "stem.pipeline.execute", payload.clone()).await;

    for ws in [&mut a, &mut b] {
        let frame = read_json(ws).await;
        assert_eq!(frame["type"], "stem.pipeline.execute");
        assert_eq!(frame["data"], payload);
    }
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn rank_reconnect_takes_over_slot() {
    let (url, _server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    let (mut d, _) = connect(&url, "tok-alice").await;
    announce(&mut d, "w1", 1).await;
    for ws in [&mut a, &mut b, &mut c, &mut d] {
        let workers = read_workers(ws).await;
        assert_eq!(rank_count(&workers, "w1"), 2);
    }

    send(&mut c, "stem.pipeline.create", json!({"workerId": "w1"})).await;
    for ws in [&mut a, &mut d] {
        assert_eq!(read_json(ws).await["type"], "stem.pipeline.create");
    }
    expect_silence(&mut b).await;

    // B no longer holds a slot, so its departure changes nothing.
    b.close(None).await.unwrap();
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn disconnect_releases_slots() {
    let (url, server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    b.close(None).await.unwrap();
    for ws in [&mut a, &mut c] {
        let workers = read_workers(ws).await;
        assert_eq!(rank_count(&workers, "w1"), 1);
        assert!(workers["w1"]["ranks"]["0"].is_string());
    }

    a.close(None).await.unwrap();
    let workers = read_workers(&mut c).await;
    assert_eq!(workers, json!({}));
    assert_eq!(server.registry().worker_count(), 0);
}

#[tokio::test]
async fn command_for_unknown_worker_is_dropped() {
    let (url, _server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    send(&mut c, "stem.pipeline.execute", json!({"workerId": "ghost"})).await;
    for ws in [&mut a, &mut b, &mut c] {
        expect_silence(ws).await;
    }
}

#[tokio::test]
async fn users_are_isolated() {
    let (url, _server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    let (mut x, snapshot) = connect(&url, "tok-bob").await;
    assert_eq!(snapshot, json!({}));

    // Bob cannot reach alice's worker.
    send(&mut x, "stem.pipeline.execute", json!({"workerId": "w1"})).await;
    for ws in [&mut a, &mut b] {
        expect_silence(ws).await;
    }

    // Alice's status events stay within alice's group.
    send(&mut a, "stem.pipeline.executed", json!({"pipelineId": "p1"})).await;
    for ws in [&mut b, &mut c] {
        assert_eq!(read_json(ws).await["type"], "stem.pipeline.executed");
    }
    expect_silence(&mut x).await;
}

#[tokio::test]
async fn status_relay_excludes_sender() {
    let (url, _server) = boot_server().await;
    let (mut a, mut b, mut c) = alice_fleet(&url).await;

    let data = json!({"width": 128, "height": 128});
    send(&mut c, "stem.size", data.clone()).await;
    for ws in [&mut a, &mut b] {
        let frame = read_json(ws).await;
        assert_eq!(frame["type"], "stem.size");
        assert_eq!(frame["data"], data);
    }
    expect_silence(&mut c).await;
}

#[tokio::test]
async fn malformed_frames_get_error_reply() {
    let (url, _server) = boot_server().await;
    let (mut ws, _) = connect(&url, "tok-alice").await;

    ws.send(Message::Text("not json".into())).await.unwrap();
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["type"], "stem.error");
    assert_eq!(frame["data"]["code"], "PARSE_ERROR");

    send(&mut ws, "stem.bogus", json!({})).await;
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["data"]["code"], "UNKNOWN_EVENT");

    send(&mut ws, "stem.worker_connected", json!({"id": "w1"})).await;
    let frame = read_json(&mut ws).await;
    assert_eq!(frame["data"]["code"], "INVALID_PARAMS");

    // The connection survives.
    announce(&mut ws, "w1", 0).await;
    let workers = read_workers(&mut ws).await;
    assert_eq!(rank_count(&workers, "w1"), 1);
}

#[tokio::test]
async fn bad_token_is_rejected_before_upgrade() {
    let (url, server) = boot_server().await;
    let err = connect_async(format!("{url}?token=nope")).await.unwrap_err();
    match err {
        tungstenite::Error::Http(resp) => assert_eq!(resp.status(), 401),
        other => panic!("expected HTTP 401, got {other:?}"),
    }

    let err = connect_async(url.clone()).await.unwrap_err();
    assert!(matches!(err, tungstenite::Error::Http(ref r) if r.status() == 401));
    assert_eq!(server.hub().connection_count(), 0);
}

#[tokio::test]
async fn shutdown_closes_with_going_away() {
    let (url, server) = boot_server().await;
    let (mut ws, _) = connect(&url, "tok-alice").await;

    server.shutdown().trigger();
    assert_eq!(read_close_code(&mut ws).await, Some(1001));
}

/// Read until a Close frame arrives and return its code.
async fn read_close_code(ws: &mut WsStream) -> Option<u16> {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for close")
            .expect("stream ended")
            .unwrap();
        if let Message::Close(frame) = msg {
            return frame.map(|f| u16::from(f.code));
        }
    }
}

#[tokio::test]
async fn revoked_token_closes_before_frame_is_handled() {
    let provider = Arc::new(RevocableProvider::default());
    let (url, server) = boot_with(provider.clone()).await;
    let (mut ws, _) = connect(&url, "tok-any").await;

    provider.revoke();
    announce(&mut ws, "w1", 0).await;

    assert_eq!(read_close_code(&mut ws).await, Some(4001));
    assert_eq!(server.registry().worker_count(), 0);
    assert_eq!(server.registry().user_count(), 0);
}

#[tokio::test]
async fn health_counts_connections() {
    let (url, _server) = boot_server().await;
    let (_a, _b, _c) = alice_fleet(&url).await;
    let health_url = url.replace("ws://", "http://").replace("/stem", "/health");

    let body: Value = reqwest::get(&health_url)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["connections"], 3);
    assert_eq!(body["users"], 1);
    assert_eq!(body["workers"], 1);
}
