//! `GET /health` body.

use std::time::Instant;

use serde::Serialize;

/// Serving state reported by `/health`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServingState {
    /// Accepting connections.
    Ok,
    /// Shutdown has begun; new upgrades get 503.
    ShuttingDown,
}

impl ServingState {
    /// State for the given shutdown flag.
    pub fn from_shutdown(shutting_down: bool) -> Self {
        if shutting_down {
            Self::ShuttingDown
        } else {
            Self::Ok
        }
    }
}

/// Live counters plus uptime.
#[derive(Clone, Debug, Serialize)]
pub struct HealthResponse {
    /// Serving state.
    pub status: ServingState,
    /// Whole seconds since startup.
    pub uptime_secs: u64,
    /// Open WebSocket connections.
    pub connections: usize,
    /// Users with at least one registered worker.
    pub users: usize,
    /// Registered workers, all users.
    pub workers: usize,
}

impl HealthResponse {
    /// Snapshot the server's counters.
    pub fn new(
        started: Instant,
        status: ServingState,
        connections: usize,
        users: usize,
        workers: usize,
    ) -> Self {
        Self {
            status,
            uptime_secs: started.elapsed().as_secs(),
            connections,
            users,
            workers,
        }
    }
}
