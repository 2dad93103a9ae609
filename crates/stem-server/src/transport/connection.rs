//! Per-connection outbound state.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use metrics::counter;
use parking_lot::Mutex;
use stem_core::{ConnectionId, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::metrics::WS_SEND_DROPS_TOTAL;

/// Close code and reason requested for a connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloseRequest {
    /// WebSocket close code.
    pub code: u16,
    /// Human-readable reason.
    pub reason: String,
}

/// One live, authenticated WebSocket connection.
///
/// Frames are pushed onto a bounded queue that the session's writer task
/// drains. Pushing never waits; a full or closed queue drops the frame.
pub struct ClientConnection {
    /// Transport-assigned id.
    pub id: ConnectionId,
    /// User bound at connect time.
    pub user_id: UserId,
    /// Upgrade time.
    pub connected_at: Instant,
    outbound: mpsc::Sender<Arc<str>>,
    // Milliseconds after `connected_at` of the last inbound frame.
    last_seen_ms: AtomicU64,
    dropped: AtomicU64,
    close_request: Mutex<Option<CloseRequest>>,
    closed: CancellationToken,
}

impl ClientConnection {
    /// Wrap the sending half of a session's outbound queue.
    pub fn new(id: ConnectionId, user_id: UserId, outbound: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            id,
            user_id,
            connected_at: Instant::now(),
            outbound,
            last_seen_ms: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            close_request: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Enqueue a serialized frame. `false` means it was dropped.
    pub fn send(&self, frame: Arc<str>) -> bool {
        if self.is_closed() {
            return false;
        }
        match self.outbound.try_send(frame) {
            Ok(()) => true,
            Err(_) => {
                let _ = self.dropped.fetch_add(1, Ordering::Relaxed);
                counter!(WS_SEND_DROPS_TOTAL).increment(1);
                false
            }
        }
    }

    /// Frames dropped on a full or closed queue.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Ask the writer to send a Close frame with `code` and stop.
    ///
    /// The first request wins.
    pub fn close(&self, code: u16, reason: impl Into<String>) {
        {
            let mut slot = self.close_request.lock();
            if slot.is_none() {
                *slot = Some(CloseRequest {
                    code,
                    reason: reason.into(),
                });
            }
        }
        self.closed.cancel();
    }

    /// Stop without a close code (peer went away, socket error).
    pub fn mark_closed(&self) {
        self.closed.cancel();
    }

    /// The close the server asked for, if any.
    pub fn close_request(&self) -> Option<CloseRequest> {
        self.close_request.lock().clone()
    }

    /// Whether the connection is closing or closed.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Record inbound activity (any frame, including Pong).
    pub fn touch(&self) {
        let ms = u64::try_from(self.connected_at.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_seen_ms.store(ms, Ordering::Relaxed);
    }

    /// Time since the last inbound frame, or since connect if none.
    pub fn idle_for(&self) -> Duration {
        let last_seen = Duration::from_millis(self.last_seen_ms.load(Ordering::Relaxed));
        self.connected_at.elapsed().saturating_sub(last_seen)
    }

    /// Time since the upgrade.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connection(capacity: usize) -> (ClientConnection, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (ClientConnection::new("conn_1".into(), "alice".into(), tx), rx)
    }

    #[tokio::test]
    async fn queued_frames_arrive_in_order() {
        let (conn, mut rx) = connection(8);
        for n in 0..3 {
            assert!(conn.send(Arc::from(format!("frame-{n}"))));
        }
        for n in 0..3 {
            assert_eq!(&*rx.recv().await.unwrap(), format!("frame-{n}"));
        }
        assert_eq!(conn.dropped(), 0);
    }

    #[test]
    fn full_queue_drops() {
        let (conn, _rx) = connection(1);
        assert!(conn.send(Arc::from("a")));
        assert!(!conn.send(Arc::from("b")));
        assert!(!conn.send(Arc::from("c")));
        assert_eq!(conn.dropped(), 2);
    }

    #[test]
    fn receiver_gone_drops() {
        let (conn, rx) = connection(8);
        drop(rx);
        assert!(!conn.send(Arc::from("a")));
        assert_eq!(conn.dropped(), 1);
    }

    #[test]
    fn first_close_request_wins() {
        let (conn, _rx) = connection(8);
        assert!(!conn.is_closed());
        conn.close(4001, "unauthorized");
        conn.close(1001, "going away");
        assert!(conn.is_closed());
        assert_eq!(
            conn.close_request(),
            Some(CloseRequest {
                code: 4001,
                reason: "unauthorized".into()
            })
        );
    }

    #[test]
    fn closed_connection_refuses_sends() {
        let (conn, _rx) = connection(8);
        conn.mark_closed();
        assert!(!conn.send(Arc::from("late")));
        assert!(conn.close_request().is_none());
        // refused, not dropped
        assert_eq!(conn.dropped(), 0);
    }

    #[tokio::test]
    async fn closed_future_resolves() {
        let (conn, _rx) = connection(8);
        let conn = Arc::new(conn);
        let waiter = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.closed().await })
        };
        conn.close(1000, "bye");
        waiter.await.unwrap();
    }

    #[test]
    fn touch_resets_idle_time() {
        let (conn, _rx) = connection(8);
        std::thread::sleep(Duration::from_millis(20));
        assert!(conn.idle_for() >= Duration::from_millis(20));
        conn.touch();
        assert!(conn.idle_for() < Duration::from_millis(20));
        assert!(conn.age() >= Duration::from_millis(20));
    }
}
