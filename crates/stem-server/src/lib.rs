//! # stem-server
//!
//! Axum WebSocket server that pairs STEM workers with the clients driving
//! them. Every connection is bound to one user. Workers announce their
//! ranks, clients receive `stem.workers` snapshots, and pipeline commands are
//! routed to the connections serving a worker's ranks.
//!
//! Registry mutations for a user are serialized, and the resulting broadcast
//! is published before the next mutation for that user begins, so every
//! member of a user's group observes snapshots in the same order.

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod gate;
pub mod health;
pub mod lifecycle;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod transport;
pub mod websocket;

pub use context::{Peer, StemContext};
pub use errors::ServerError;
pub use registry::WorkerRegistry;
pub use server::StemServer;
pub use shutdown::ShutdownCoordinator;
pub use transport::{ClientConnection, ConnectionHub, GroupTransport};
