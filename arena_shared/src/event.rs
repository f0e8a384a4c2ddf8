//! Presentation notifications.
//!
//! A small typed event bus. The core pushes what changed; presentation code
//! (team colours, door sounds, animation) drains it once per frame. Nothing
//! inside the core consumes these events.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ecs::EntityId, participant::ParticipantId, team::TeamId};

/// A participant's replicated team changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamChanged {
    pub participant: ParticipantId,
    pub team: TeamId,
}

/// A door's `is_open` flag flipped (raised where the reaction ran).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorToggled {
    pub door: EntityId,
    pub is_open: bool,
}

/// The session reached its player threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchStarted {
    pub at: DateTime<Utc>,
    pub participants: usize,
}

/// A host multicast asked every observer to play a clip on an actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnimationRequested {
    pub actor: EntityId,
    pub clip: ClipHandle,
}

/// Opaque reference to an animation clip owned by the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClipHandle(pub u32);

/// External animation player.
pub trait AnimationPlayer: Send {
    fn play(&mut self, actor: EntityId, clip: ClipHandle);
}

/// Typed event bus.
#[derive(Default)]
pub struct EventBus {
    queues: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl EventBus {
    /// Pushes an event into the queue.
    pub fn push<E: 'static + Send + Sync>(&mut self, e: E) {
        let q = self
            .queues
            .entry(TypeId::of::<E>())
            .or_insert_with(|| Box::new(Vec::<E>::new()));
        if let Some(q) = q.downcast_mut::<Vec<E>>() {
            q.push(e);
        }
    }

    /// Number of queued events of a type.
    pub fn pending<E: 'static + Send + Sync>(&self) -> usize {
        self.queues
            .get(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast_ref::<Vec<E>>())
            .map_or(0, Vec::len)
    }

    /// Drains all queued events of a type.
    pub fn drain<E: 'static + Send + Sync>(&mut self) -> Vec<E> {
        self.queues
            .remove(&TypeId::of::<E>())
            .and_then(|boxed| boxed.downcast::<Vec<E>>().ok())
            .map(|boxed| *boxed)
            .unwrap_or_default()
    }
}
