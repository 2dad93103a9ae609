//! WebSocket endpoint: credential extraction and per-connection sessions.

pub mod credentials;
pub mod session;
