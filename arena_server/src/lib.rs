//! `arena_server`
//!
//! Host-side systems:
//! - Authoritative world: participants, teams, spawns, doors, session
//! - Remote call validation and dispatch
//! - Per-tick replication fan-out to observers
//!
//! Networking model:
//! - One reliable TCP stream per observer carries handshake, entity
//!   lifecycle, field batches and remote calls.

pub mod host;
pub mod server;

pub use host::{HostWorld, JoinOutcome};
pub use server::GameServer;
