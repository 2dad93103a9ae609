//! Connection lifecycle: connect, rank announcement, disconnect.

use metrics::gauge;
use stem_core::{OutboundFrame, WorkerAnnouncement};
use tracing::{debug, info};

use crate::context::{Peer, StemContext};
use crate::metrics::{STEM_USERS_ACTIVE, STEM_WORKERS_ACTIVE};

/// Join the peer's user group and send it the user's current registry.
///
/// The snapshot is sent under the user's registry lock, so it is never
/// overtaken by an older broadcast.
pub fn connect(ctx: &StemContext, peer: &Peer) -> bool {
    ctx.transport.join(&peer.user_id, &peer.conn_id);
    let sent = ctx.registry.read_user(&peer.user_id, |workers| {
        ctx.transport
            .send_to(&peer.conn_id, &OutboundFrame::workers(workers))
    });
    debug!(conn_id = %peer.conn_id, user_id = %peer.user_id, "joined user group");
    sent
}

/// Record a rank announcement and broadcast the updated registry to the
/// whole group, sender included. Returns the number of recipients.
pub fn announce(ctx: &StemContext, peer: &Peer, announcement: WorkerAnnouncement) -> usize {
    let worker_id = announcement.worker_id.clone();
    let rank = announcement.rank;
    let recipients = ctx
        .registry
        .announce(&peer.user_id, &peer.conn_id, announcement, |workers| {
            ctx.transport
                .broadcast(&peer.user_id, &OutboundFrame::workers(workers), None)
        });
    info!(
        conn_id = %peer.conn_id,
        user_id = %peer.user_id,
        worker_id = %worker_id,
        rank,
        recipients,
        "worker rank announced"
    );
    record_registry_size(ctx);
    recipients
}

/// Leave the group and release every rank slot the peer held.
///
/// The remaining group members get the updated registry only when a slot
/// was actually released. Returns the recipient count in that case.
pub fn disconnect(ctx: &StemContext, peer: &Peer) -> Option<usize> {
    ctx.transport.leave(&peer.user_id, &peer.conn_id);
    let recipients = ctx
        .registry
        .remove_connection(&peer.user_id, &peer.conn_id, |workers| {
            ctx.transport
                .broadcast(&peer.user_id, &OutboundFrame::workers(workers), None)
        });
    if let Some(recipients) = recipients {
        info!(
            conn_id = %peer.conn_id,
            user_id = %peer.user_id,
            recipients,
            "worker ranks released"
        );
        record_registry_size(ctx);
    }
    recipients
}

fn record_registry_size(ctx: &StemContext) {
    #[allow(clippy::cast_precision_loss)]
    {
        gauge!(STEM_USERS_ACTIVE).set(ctx.registry.user_count() as f64);
        gauge!(STEM_WORKERS_ACTIVE).set(ctx.registry.worker_count() as f64);
    }
}
