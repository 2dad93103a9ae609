//! Inbound event routing.
//!
//! Frames are decoded once into [`InboundEvent`]; everything after that is a
//! total `match`. Targeted commands go to the ranks of one worker, status
//! and data events go to the rest of the sender's group, and rank
//! announcements go to the registry.

use std::collections::BTreeSet;

use metrics::counter;
use serde_json::Value;
use stem_core::{InboundEvent, OutboundFrame, TargetedCommand};
use tracing::{debug, warn};

use crate::context::{Peer, StemContext};
use crate::lifecycle;
use crate::metrics::{STEM_COMMANDS_DROPPED_TOTAL, STEM_EVENTS_TOTAL, STEM_PROTOCOL_ERRORS_TOTAL};

/// Decode one text frame from `peer` and handle it.
///
/// A frame that fails to decode is answered with `stem.error` to the sender
/// only; nothing else changes.
pub fn handle_text(ctx: &StemContext, peer: &Peer, text: &str) {
    match InboundEvent::decode(text) {
        Ok(event) => dispatch(ctx, peer, event),
        Err(e) => {
            warn!(conn_id = %peer.conn_id, code = e.code(), error = %e, "rejected frame");
            counter!(STEM_PROTOCOL_ERRORS_TOTAL, "code" => e.code()).increment(1);
            let _ = ctx
                .transport
                .send_to(&peer.conn_id, &OutboundFrame::error(&e));
        }
    }
}

/// Handle a decoded event from `peer`.
pub fn dispatch(ctx: &StemContext, peer: &Peer, event: InboundEvent) {
    let name = event.event_name();
    counter!(STEM_EVENTS_TOTAL, "event" => name).increment(1);
    debug!(conn_id = %peer.conn_id, user_id = %peer.user_id, event = name, "inbound event");

    match event {
        InboundEvent::WorkerConnected(announcement) => {
            let _ = lifecycle::announce(ctx, peer, announcement);
        }
        InboundEvent::PipelineCreate(command) | InboundEvent::PipelineExecute(command) => {
            let _ = route_command(ctx, peer, name, command);
        }
        InboundEvent::PipelineCreated(data)
        | InboundEvent::PipelineExecuted(data)
        | InboundEvent::PipelineDelete(data)
        | InboundEvent::Bright(data)
        | InboundEvent::Dark(data)
        | InboundEvent::Size(data) => {
            let _ = relay(ctx, peer, name, data);
        }
    }
}

/// Forward a command, payload untouched, to every rank connection of the
/// target worker except the sender. Returns how many connections it was
/// queued for. An unknown worker is not an error.
pub fn route_command(
    ctx: &StemContext,
    peer: &Peer,
    event: &'static str,
    command: TargetedCommand,
) -> usize {
    let targets: BTreeSet<_> = ctx
        .registry
        .rank_connections(&peer.user_id, &command.worker_id)
        .into_iter()
        .filter(|conn| *conn != peer.conn_id)
        .collect();

    if targets.is_empty() {
        debug!(
            user_id = %peer.user_id,
            worker_id = %command.worker_id,
            event,
            "no ranks for worker, dropping command"
        );
        counter!(STEM_COMMANDS_DROPPED_TOTAL).increment(1);
        return 0;
    }

    let frame = OutboundFrame::new(event, command.payload);
    let delivered = targets
        .iter()
        .filter(|conn| ctx.transport.send_to(conn, &frame))
        .count();
    debug!(
        user_id = %peer.user_id,
        worker_id = %command.worker_id,
        event,
        delivered,
        "command routed"
    );
    delivered
}

/// Re-broadcast an event verbatim to the sender's group, sender excluded.
pub fn relay(ctx: &StemContext, peer: &Peer, event: &'static str, data: Value) -> usize {
    ctx.transport.broadcast(
        &peer.user_id,
        &OutboundFrame::new(event, data),
        Some(&peer.conn_id),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::test_helpers::{Harness, TestClient};
    use serde_json::json;
    use stem_core::protocol::events;

    fn frame(event: &str, data: Value) -> String {
        json!({"type": event, "data": data}).to_string()
    }

    fn announce(h: &Harness, client: &mut TestClient, worker: &str, rank: u32) {
        handle_text(
            &h.ctx,
            &client.peer,
            &frame(events::WORKER_CONNECTED, json!({"id": worker, "rank": rank})),
        );
    }

    /// W1 ranks {0: A, 1: B}; clients C (alice) and X (bob).
    fn scenario() -> (Harness, [TestClient; 4]) {
        let h = Harness::new();
        let mut a = h.client("A", "alice");
        let mut b = h.client("B", "alice");
        let mut c = h.client("C", "alice");
        let mut x = h.client("X", "bob");
        announce(&h, &mut a, "w1", 0);
        announce(&h, &mut b, "w1", 1);
        for client in [&mut a, &mut b, &mut c, &mut x] {
            let _ = client.drain();
        }
        (h, [a, b, c, x])
    }

    #[test]
    fn execute_reaches_every_rank_but_not_sender() {
        let (h, [mut a, mut b, mut c, mut x]) = scenario();
        let payload = json!({"workerId": "w1", "name": "sum", "params": {"n": 3}});
        handle_text(&h.ctx, &c.peer, &frame(events::PIPELINE_EXECUTE, payload.clone()));

        for rank in [&mut a, &mut b] {
            let msg = rank.next().unwrap();
            assert_eq!(msg["type"], events::PIPELINE_EXECUTE);
            assert_eq!(msg["data"], payload);
            assert!(rank.next().is_none());
        }
        assert!(c.next().is_none());
        assert!(x.next().is_none());
    }

    #[test]
    fn create_from_a_rank_skips_that_rank() {
        let (h, [mut a, mut b, _c, _x]) = scenario();
        handle_text(
            &h.ctx,
            &a.peer,
            &frame(events::PIPELINE_CREATE, json!({"workerId": "w1"})),
        );
        assert!(a.next().is_none());
        assert_eq!(b.next().unwrap()["type"], events::PIPELINE_CREATE);
    }

    #[test]
    fn reconnected_rank_receives_next_command() {
        let (h, [mut a, mut b, c, _x]) = scenario();
        let mut d = h.client("D", "alice");
        announce(&h, &mut d, "w1", 0);
        let _ = (a.drain(), b.drain(), d.drain());

        handle_text(
            &h.ctx,
            &c.peer,
            &frame(events::PIPELINE_EXECUTE, json!({"workerId": "w1"})),
        );
        assert!(a.next().is_none());
        assert!(d.next().is_some());
        assert!(b.next().is_some());
    }

    #[test]
    fn command_for_ghost_worker_is_dropped_quietly() {
        let (h, [mut a, mut b, mut c, _x]) = scenario();
        handle_text(
            &h.ctx,
            &c.peer,
            &frame(events::PIPELINE_CREATE, json!({"workerId": "ghost"})),
        );
        assert!(a.next().is_none());
        assert!(b.next().is_none());
        assert!(c.next().is_none());
        assert_eq!(h.ctx.registry.worker_count(), 1);
    }

    #[test]
    fn command_cannot_reach_another_users_worker() {
        let (h, [mut a, mut b, _c, mut x]) = scenario();
        handle_text(
            &h.ctx,
            &x.peer,
            &frame(events::PIPELINE_EXECUTE, json!({"workerId": "w1"})),
        );
        assert!(a.next().is_none());
        assert!(b.next().is_none());
        assert!(x.next().is_none());
    }

    #[test]
    fn rank_shared_by_one_connection_gets_one_copy() {
        let h = Harness::new();
        let mut a = h.client("A", "alice");
        let c = h.client("C", "alice");
        announce(&h, &mut a, "w1", 0);
        announce(&h, &mut a, "w1", 1);
        let _ = a.drain();

        let n = route_command(
            &h.ctx,
            &c.peer,
            events::PIPELINE_EXECUTE,
            TargetedCommand {
                worker_id: "w1".into(),
                payload: json!({"workerId": "w1"}),
            },
        );
        assert_eq!(n, 1);
        assert_eq!(a.drain().len(), 1);
    }

    #[test]
    fn status_events_go_to_group_minus_sender() {
        let (h, [mut a, mut b, mut c, mut x]) = scenario();
        for name in [
            events::PIPELINE_CREATED,
            events::PIPELINE_EXECUTED,
            events::PIPELINE_DELETE,
            events::BRIGHT,
            events::DARK,
            events::SIZE,
        ] {
            let data = json!({"event": name, "values": [1, 2]});
            handle_text(&h.ctx, &a.peer, &frame(name, data.clone()));
            assert!(a.next().is_none(), "{name} echoed to sender");
            for peer in [&mut b, &mut c] {
                let msg = peer.next().unwrap();
                assert_eq!(msg["type"], name);
                assert_eq!(msg["data"], data);
            }
            assert!(x.next().is_none(), "{name} leaked to another user");
        }
    }

    #[test]
    fn worker_connected_updates_everyone_in_group() {
        let (h, [mut a, mut b, mut c, mut x]) = scenario();
        let mut e = h.client("E", "alice");
        handle_text(
            &h.ctx,
            &e.peer,
            &frame(
                events::WORKER_CONNECTED,
                json!({"id": "w2", "rank": 0, "pipelines": ["p"]}),
            ),
        );
        for peer in [&mut a, &mut b, &mut c, &mut e] {
            let msg = peer.next().unwrap();
            assert_eq!(msg["type"], events::WORKERS);
            assert_eq!(msg["data"]["w2"]["ranks"]["0"], "E");
            assert_eq!(msg["data"]["w1"]["ranks"]["1"], "B");
        }
        assert!(x.next().is_none());
    }

    #[test]
    fn malformed_frames_answer_sender_only() {
        let (h, [mut a, _b, mut c, _x]) = scenario();
        for (text, code) in [
            ("not json".to_string(), "PARSE_ERROR"),
            (frame("stem.reboot", json!({})), "UNKNOWN_EVENT"),
            (frame(events::PIPELINE_EXECUTE, json!({"name": "sum"})), "INVALID_PARAMS"),
            (frame(events::WORKER_CONNECTED, json!({"id": "w1", "rank": "zero"})), "INVALID_PARAMS"),
        ] {
            handle_text(&h.ctx, &c.peer, &text);
            let msg = c.next().unwrap();
            assert_eq!(msg["type"], events::ERROR);
            assert_eq!(msg["data"]["code"], code);
            assert!(a.next().is_none());
        }
        let snap = h.ctx.registry.snapshot(&"alice".into());
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[&stem_core::WorkerId::from("w1")].ranks.len(), 2);
    }
}
