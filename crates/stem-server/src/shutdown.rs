//! Shutdown signal and session tracking.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tokio_util::task::task_tracker::TrackedFuture;
use tracing::{info, warn};

/// How long [`ShutdownCoordinator::drain`] waits by default.
const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shared shutdown signal plus the set of live WebSocket session tasks.
///
/// Sessions watch [`token`](Self::token) and send a Close frame when it
/// fires. The listener uses the same token for axum's graceful shutdown.
#[derive(Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a coordinator with no sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled once shutdown begins.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Begin shutdown. Idempotent.
    pub fn trigger(&self) {
        if !self.token.is_cancelled() {
            info!(sessions = self.sessions.len(), "shutdown triggered");
        }
        self.token.cancel();
        let _ = self.sessions.close();
    }

    /// Whether shutdown has begun.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wrap a session future so [`drain`](Self::drain) waits for it.
    pub fn track<F: Future>(&self, session: F) -> TrackedFuture<F> {
        self.sessions.track_future(session)
    }

    /// Sessions still running.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Trigger shutdown and wait for every tracked session and the listener.
    ///
    /// Returns `false` if `timeout` (default 10s) elapsed first, in which
    /// case the listener task is aborted.
    pub async fn drain(&self, listener: JoinHandle<()>, timeout: Option<Duration>) -> bool {
        let timeout = timeout.unwrap_or(DEFAULT_DRAIN_TIMEOUT);
        self.trigger();

        let abort = listener.abort_handle();
        let wait = async {
            self.sessions.wait().await;
            let _ = listener.await;
        };
        if tokio::time::timeout(timeout, wait).await.is_ok() {
            info!("shutdown complete");
            true
        } else {
            warn!(
                sessions = self.sessions.len(),
                "shutdown timed out after {timeout:?}, aborting listener"
            );
            abort.abort();
            false
        }
    }
}
