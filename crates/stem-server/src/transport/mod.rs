//! Group messaging over live connections.
//!
//! The registry and router only talk to connections through
//! [`GroupTransport`]; [`ConnectionHub`] is the in-process WebSocket
//! implementation. Every connection belongs to exactly one group, keyed by
//! the user it authenticated as.

pub mod connection;
pub mod hub;

pub use connection::{ClientConnection, CloseRequest};
pub use hub::ConnectionHub;

use stem_core::{ConnectionId, OutboundFrame, UserId};

/// Per-user message fan-out.
///
/// All sends are fire-and-forget enqueues; none of these methods wait on a
/// peer.
pub trait GroupTransport: Send + Sync {
    /// Add a connection to `group`.
    fn join(&self, group: &UserId, connection: &ConnectionId);

    /// Remove a connection from `group`. Unknown ids are ignored.
    fn leave(&self, group: &UserId, connection: &ConnectionId);

    /// Deliver a frame to one connection. Returns `false` if the connection
    /// is gone or its queue is full.
    fn send_to(&self, connection: &ConnectionId, frame: &OutboundFrame) -> bool;

    /// Deliver a frame to every member of `group` except `exclude`.
    /// Returns the number of connections the frame was queued for.
    fn broadcast(
        &self,
        group: &UserId,
        frame: &OutboundFrame,
        exclude: Option<&ConnectionId>,
    ) -> usize;

    /// Close a connection with the given WebSocket close code.
    fn close(&self, connection: &ConnectionId, code: u16, reason: &str);
}
