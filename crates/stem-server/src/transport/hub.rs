//! In-process [`GroupTransport`] over WebSocket connections.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use stem_core::{ConnectionId, OutboundFrame, UserId};
use tracing::{debug, warn};

use super::GroupTransport;
use super::connection::ClientConnection;

/// Tracks live connections and the per-user groups they belong to.
#[derive(Default)]
pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Arc<ClientConnection>>,
    groups: DashMap<UserId, HashSet<ConnectionId>>,
}

impl ConnectionHub {
    /// Create an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a connection addressable. Group membership is separate
    /// ([`GroupTransport::join`]).
    pub fn register(&self, connection: Arc<ClientConnection>) {
        let _ = self.connections.insert(connection.id.clone(), connection);
    }

    /// Forget a connection and drop it from every group.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        let (_, conn) = self.connections.remove(id)?;
        self.leave(&conn.user_id, id);
        Some(conn)
    }

    /// Look up a live connection.
    pub fn get(&self, id: &ConnectionId) -> Option<Arc<ClientConnection>> {
        self.connections.get(id).map(|c| c.value().clone())
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of connections currently in `group`.
    pub fn group_size(&self, group: &UserId) -> usize {
        self.groups.get(group).map_or(0, |members| members.len())
    }

    /// Close every live connection (server shutdown).
    pub fn close_all(&self, code: u16, reason: &str) {
        for conn in &self.connections {
            conn.close(code, reason);
        }
    }

    fn members(&self, group: &UserId) -> Vec<ConnectionId> {
        self.groups
            .get(group)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default()
    }
}

fn serialize(frame: &OutboundFrame) -> Option<Arc<str>> {
    match frame.to_json() {
        Ok(json) => Some(Arc::from(json)),
        Err(e) => {
            warn!(event_type = %frame.event_type, error = %e, "failed to serialize frame");
            None
        }
    }
}

impl GroupTransport for ConnectionHub {
    fn join(&self, group: &UserId, connection: &ConnectionId) {
        let _ = self
            .groups
            .entry(group.clone())
            .or_default()
            .insert(connection.clone());
    }

    fn leave(&self, group: &UserId, connection: &ConnectionId) {
        if let Some(mut members) = self.groups.get_mut(group) {
            let _ = members.remove(connection);
        }
        let _ = self.groups.remove_if(group, |_, members| members.is_empty());
    }

    fn send_to(&self, connection: &ConnectionId, frame: &OutboundFrame) -> bool {
        let Some(conn) = self.get(connection) else {
            debug!(conn_id = %connection, event_type = %frame.event_type, "send to unknown connection");
            return false;
        };
        let Some(json) = serialize(frame) else {
            return false;
        };
        let sent = conn.send(json);
        if !sent {
            warn!(conn_id = %connection, event_type = %frame.event_type, "failed to enqueue frame");
        }
        sent
    }

    fn broadcast(
        &self,
        group: &UserId,
        frame: &OutboundFrame,
        exclude: Option<&ConnectionId>,
    ) -> usize {
        let members = self.members(group);
        if members.is_empty() {
            return 0;
        }
        let Some(json) = serialize(frame) else {
            return 0;
        };
        let mut delivered = 0;
        for id in members.iter().filter(|id| Some(*id) != exclude) {
            let Some(conn) = self.get(id) else { continue };
            if conn.send(json.clone()) {
                delivered += 1;
            } else {
                warn!(conn_id = %id, event_type = %frame.event_type, "failed to enqueue broadcast");
            }
        }
        debug!(
            user_id = %group,
            event_type = %frame.event_type,
            recipients = delivered,
            "broadcast to group"
        );
        delivered
    }

    fn close(&self, connection: &ConnectionId, code: u16, reason: &str) {
        if let Some(conn) = self.get(connection) {
            conn.close(code, reason);
        }
    }
}
