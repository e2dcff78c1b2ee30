//! Peer replication for the persister.
//!
//! A persister serves other persisters through [`PeerHandler`] and follows
//! its own upstreams through [`Replicator`]. Objects received from a peer
//! are ingested as non-remotable, so they are never echoed back.
//!
//! # Key Types
//!
//! - [`PeerTransport`]: moves protocol messages to one remote persister
//! - [`PeerClient`]: typed protocol operations over a transport
//! - [`PeerHandler`] / [`PeerSession`]: answer peer requests against a local
//!   persister and forward subscription updates
//! - [`LoopbackTransport`]: in-process transport through the framing codec
//! - [`Replicator`]: push worker, first-success pulls, upstream subscriptions

pub mod client;
pub mod error;
pub mod handler;
pub mod loopback;
pub mod replicator;
pub mod transport;

pub use client::PeerClient;
pub use error::{RemoteError, RemoteResult};
pub use handler::{PeerHandler, PeerSession};
pub use loopback::LoopbackTransport;
pub use replicator::Replicator;
pub use transport::PeerTransport;
