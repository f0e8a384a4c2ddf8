//! Session participants.

use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::{ecs::EntityId, team::TeamId, trigger::InteractionBinding};

static NEXT_PARTICIPANT_ID: AtomicU32 = AtomicU32::new(1);

/// Identifies a connected participant. A rejoin gets a fresh id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ParticipantId(pub u32);

impl ParticipantId {
    pub fn new_unique() -> Self {
        ParticipantId(NEXT_PARTICIPANT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// Host-side record of a participant.
#[derive(Debug, Clone, PartialEq)]
pub struct Participant {
    pub id: ParticipantId,
    pub name: String,
    /// `None` until the host assigns one at spawn time.
    pub team: Option<TeamId>,
    /// Character spawned for the current life.
    pub character: Option<EntityId>,
}

impl Participant {
    pub fn new(id: ParticipantId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            team: None,
            character: None,
        }
    }
}

/// Component on a participant's in-world actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Character {
    pub owner: ParticipantId,
    pub binding: InteractionBinding,
}

impl Character {
    pub fn new(owner: ParticipantId) -> Self {
        Self {
            owner,
            binding: InteractionBinding::default(),
        }
    }
}
