//! `arena_client`
//!
//! Observer-side systems:
//! - Connection management over one reliable stream
//! - Replica-driven door simulation and presentation events
//! - Input capture, command generation and toggle requests

pub mod client;
pub mod input;
pub mod observer;

pub use client::GameClient;
pub use observer::ObserverWorld;
