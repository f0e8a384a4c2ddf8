//! `arena_shared`
//!
//! Shared core used by both host and observers.
//!
//! Design goals:
//! - Transport-agnostic: replication and remote calls are queues, not sockets.
//! - Single writer: only the host mutates replicated state; observers read
//!   and request.
//! - Deterministic where practical (stable iteration, seedable randomness).
//! - No `unsafe`.

pub mod config;
pub mod door;
pub mod ecs;
pub mod event;
pub mod math;
pub mod net;
pub mod participant;
pub mod rpc;
pub mod session;
pub mod spawn;
pub mod sync;
pub mod team;
pub mod trigger;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::config::*;
    pub use crate::door::{Door, DoorPhase, DoorState, Hinge, MeshActuator};
    pub use crate::ecs::*;
    pub use crate::event::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::participant::*;
    pub use crate::rpc::*;
    pub use crate::session::*;
    pub use crate::spawn::*;
    pub use crate::sync::*;
    pub use crate::team::*;
    pub use crate::trigger::*;
}
