//! # stem-core
//!
//! Foundation types for the stemserver coordination service.
//!
//! - Branded ID newtypes ([`UserId`], [`WorkerId`], [`ConnectionId`])
//! - The `stem.*` WebSocket event protocol, decoded once at the boundary into
//!   the closed [`InboundEvent`] enum
//! - Registry snapshot wire types sent as `stem.workers`
//! - [`ProtocolError`] for frames that fail validation

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod protocol;

pub use errors::ProtocolError;
pub use ids::{ConnectionId, RankId, UserId, WorkerId};
pub use protocol::{
    InboundEvent, OutboundFrame, TargetedCommand, WorkerAnnouncement, WorkerView, WorkersSnapshot,
};
