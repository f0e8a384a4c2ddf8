//! Sync channel: host-to-observer state replication.
//!
//! The host keeps a [`SyncRegistry`]: every replicated field is registered
//! per target with its latest value and a dirty bit. Writes are
//! last-write-wins and only mark the field dirty when the value actually
//! changes. Once per tick the dispatcher drains the dirty set into a batch of
//! [`FieldUpdate`]s and hands it to whatever transport is in use.
//!
//! Observers hold a [`SyncReplica`]. Applying an update stores the value and
//! reports whether a registered on-change notification should run.
//!
//! Delivery is eventual and reliable, but nothing here orders distinct
//! fields relative to each other. Consumers must not assume two fields seen
//! in the same tick were written together on the host.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::{ecs::EntityId, math::Vec3, participant::ParticipantId, team::TeamId};

bitflags::bitflags! {
    /// Set of replicated fields.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldMask: u16 {
        const IS_OPEN = 1 << 0;
        const IS_OPENING = 1 << 1;
        const IS_CLOSING = 1 << 2;
        const SIGN_OF_APPROACH = 1 << 3;
        const TARGET_ANGLE = 1 << 4;
        const INTERACTION_VECTOR = 1 << 5;
        const INTERACTABLE = 1 << 6;
        const TEAM = 1 << 7;
        const NUM_TEAMS = 1 << 8;
        const TEAM_SCORES = 1 << 9;

        /// Everything a door must register; leaving one out desyncs derived state.
        const DOOR = Self::IS_OPEN.bits()
            | Self::IS_OPENING.bits()
            | Self::IS_CLOSING.bits()
            | Self::SIGN_OF_APPROACH.bits()
            | Self::TARGET_ANGLE.bits()
            | Self::INTERACTION_VECTOR.bits();
    }
}

impl Default for FieldMask {
    fn default() -> Self {
        Self::empty()
    }
}

/// A single replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    IsOpen,
    IsOpening,
    IsClosing,
    SignOfApproach,
    TargetAngle,
    InteractionVector,
    /// Character's weak reference to the interactable in range.
    Interactable,
    Team,
    NumTeams,
    TeamScores,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::IsOpen,
        Field::IsOpening,
        Field::IsClosing,
        Field::SignOfApproach,
        Field::TargetAngle,
        Field::InteractionVector,
        Field::Interactable,
        Field::Team,
        Field::NumTeams,
        Field::TeamScores,
    ];

    pub fn mask(self) -> FieldMask {
        match self {
            Field::IsOpen => FieldMask::IS_OPEN,
            Field::IsOpening => FieldMask::IS_OPENING,
            Field::IsClosing => FieldMask::IS_CLOSING,
            Field::SignOfApproach => FieldMask::SIGN_OF_APPROACH,
            Field::TargetAngle => FieldMask::TARGET_ANGLE,
            Field::InteractionVector => FieldMask::INTERACTION_VECTOR,
            Field::Interactable => FieldMask::INTERACTABLE,
            Field::Team => FieldMask::TEAM,
            Field::NumTeams => FieldMask::NUM_TEAMS,
            Field::TeamScores => FieldMask::TEAM_SCORES,
        }
    }

    /// Fields contained in `mask`, in declaration order.
    pub fn in_mask(mask: FieldMask) -> impl Iterator<Item = Field> {
        Field::ALL.into_iter().filter(move |f| mask.contains(f.mask()))
    }
}

/// Owner of a replicated field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncTarget {
    Entity(EntityId),
    Participant(ParticipantId),
    Session,
}

/// Replicated value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncValue {
    Bool(bool),
    Float(f32),
    Vec3(Vec3),
    Entity(Option<EntityId>),
    Team(Option<TeamId>),
    Count(u8),
    Scores(Vec<i32>),
}

impl SyncValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SyncValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f32> {
        match self {
            SyncValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vec3(&self) -> Option<Vec3> {
        match self {
            SyncValue::Vec3(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_entity(&self) -> Option<Option<EntityId>> {
        match self {
            SyncValue::Entity(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_team(&self) -> Option<Option<TeamId>> {
        match self {
            SyncValue::Team(v) => Some(*v),
            _ => None,
        }
    }
}

/// One field's new value on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldUpdate {
    pub target: SyncTarget,
    pub field: Field,
    pub value: SyncValue,
}

/// Sync registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// Write to a field that was never registered for the target.
    Unregistered { target: SyncTarget, field: Field },
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::Unregistered { target, field } => {
                write!(f, "field {field:?} not registered for {target:?}")
            }
        }
    }
}

impl std::error::Error for SyncError {}

#[derive(Debug, Default)]
struct TargetState {
    dirty: FieldMask,
    values: BTreeMap<Field, SyncValue>,
    /// Dropped after its pending values have been drained once.
    retired: bool,
}

/// Host-side registry of replicated fields.
#[derive(Debug, Default)]
pub struct SyncRegistry {
    targets: BTreeMap<SyncTarget, TargetState>,
}

impl SyncRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a field with its initial value. The initial value is dirty so
    /// already-connected observers learn about it on the next drain.
    pub fn register(&mut self, target: SyncTarget, field: Field, initial: SyncValue) {
        let state = self.targets.entry(target).or_default();
        state.values.insert(field, initial);
        state.dirty |= field.mask();
    }

    /// Declares several fields at once.
    pub fn register_all(
        &mut self,
        target: SyncTarget,
        fields: impl IntoIterator<Item = (Field, SyncValue)>,
    ) {
        for (field, value) in fields {
            self.register(target, field, value);
        }
    }

    /// Registered fields of a target.
    pub fn registered(&self, target: SyncTarget) -> FieldMask {
        self.targets.get(&target).map_or(FieldMask::empty(), |s| {
            s.values
                .keys()
                .fold(FieldMask::empty(), |acc, f| acc | f.mask())
        })
    }

    /// Drops every field of a target (entity despawned, participant left).
    pub fn unregister(&mut self, target: SyncTarget) {
        self.targets.remove(&target);
    }

    /// Drops a target after the next drain, so its final values still reach
    /// connected observers. Retired targets are left out of snapshots.
    pub fn retire(&mut self, target: SyncTarget) {
        if let Some(state) = self.targets.get_mut(&target) {
            state.retired = true;
        }
    }

    /// Last-write-wins store. Returns whether the value changed.
    pub fn set(
        &mut self,
        target: SyncTarget,
        field: Field,
        value: SyncValue,
    ) -> Result<bool, SyncError> {
        let state = self
            .targets
            .get_mut(&target)
            .ok_or(SyncError::Unregistered { target, field })?;
        let slot = state
            .values
            .get_mut(&field)
            .ok_or(SyncError::Unregistered { target, field })?;
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        state.dirty |= field.mask();
        Ok(true)
    }

    pub fn get(&self, target: SyncTarget, field: Field) -> Option<&SyncValue> {
        self.targets.get(&target)?.values.get(&field)
    }

    pub fn has_dirty(&self) -> bool {
        self.targets.values().any(|s| !s.dirty.is_empty())
    }

    /// Takes every dirty field's latest value and clears the dirty bits.
    pub fn drain_dirty(&mut self) -> Vec<FieldUpdate> {
        let mut out = Vec::new();
        for (target, state) in self.targets.iter_mut() {
            if state.dirty.is_empty() {
                continue;
            }
            for field in Field::in_mask(state.dirty) {
                if let Some(value) = state.values.get(&field) {
                    out.push(FieldUpdate {
                        target: *target,
                        field,
                        value: value.clone(),
                    });
                }
            }
            state.dirty = FieldMask::empty();
        }
        self.targets.retain(|_, state| !state.retired);
        out
    }

    /// Every registered value, for an observer joining mid-session.
    pub fn snapshot(&self) -> Vec<FieldUpdate> {
        self.targets
            .iter()
            .filter(|(_, state)| !state.retired)
            .flat_map(|(target, state)| {
                state.values.iter().map(|(field, value)| FieldUpdate {
                    target: *target,
                    field: *field,
                    value: value.clone(),
                })
            })
            .collect()
    }
}

/// Result of applying one update on an observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    /// The stored value differs from what the observer held before.
    pub changed: bool,
    /// `changed` and the field has an on-change notification registered.
    pub notify: bool,
}

/// Observer-side copy of replicated state.
#[derive(Debug, Default)]
pub struct SyncReplica {
    values: HashMap<(SyncTarget, Field), SyncValue>,
    notify: FieldMask,
}

impl SyncReplica {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers on-change notification for the fields in `mask`.
    pub fn notify_on(&mut self, mask: FieldMask) {
        self.notify |= mask;
    }

    /// Stores an update. A first value counts as changed only if it differs
    /// from `default`, matching what the observer's local state started with.
    pub fn apply(&mut self, update: &FieldUpdate, default: Option<&SyncValue>) -> Applied {
        let key = (update.target, update.field);
        let previous = self.values.insert(key, update.value.clone());
        let changed = match previous.as_ref().or(default) {
            Some(prev) => *prev != update.value,
            None => true,
        };
        Applied {
            changed,
            notify: changed && self.notify.contains(update.field.mask()),
        }
    }

    pub fn get(&self, target: SyncTarget, field: Field) -> Option<&SyncValue> {
        self.values.get(&(target, field))
    }

    /// Values already received for a target, e.g. before its spawn arrived.
    pub fn values_for(&self, target: SyncTarget) -> Vec<(Field, SyncValue)> {
        let mut out: Vec<_> = self
            .values
            .iter()
            .filter(|((t, _), _)| *t == target)
            .map(|((_, f), v)| (*f, v.clone()))
            .collect();
        out.sort_by_key(|(f, _)| *f);
        out
    }

    pub fn forget(&mut self, target: SyncTarget) {
        self.values.retain(|(t, _), _| *t != target);
    }
}
