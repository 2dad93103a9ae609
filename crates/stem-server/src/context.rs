//! Dependency-injection context shared by every connection.

use std::sync::Arc;

use stem_auth::IdentityProvider;
use stem_core::{ConnectionId, UserId};

use crate::registry::WorkerRegistry;
use crate::transport::GroupTransport;

/// Services a connection's handlers operate on.
#[derive(Clone)]
pub struct StemContext {
    /// Per-user worker registry.
    pub registry: Arc<WorkerRegistry>,
    /// Group messaging.
    pub transport: Arc<dyn GroupTransport>,
    /// Credential resolution for connect and per-frame checks.
    pub identity: Arc<dyn IdentityProvider>,
}

/// The authenticated sender of a frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Peer {
    /// Connection the frame arrived on.
    pub conn_id: ConnectionId,
    /// User the connection is bound to.
    pub user_id: UserId,
}

impl Peer {
    /// Create a peer.
    pub fn new(conn_id: ConnectionId, user_id: UserId) -> Self {
        Self { conn_id, user_id }
    }
}
