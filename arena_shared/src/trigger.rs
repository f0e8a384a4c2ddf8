//! Interaction range tracking.
//!
//! The overlap detector belongs to the engine; the core only consumes its
//! enter/leave events. [`ProximityDetector`] is a headless stand-in that
//! tests character positions against door trigger boxes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::{
    ecs::{EntityId, EntityKind},
    math::Vec3,
};

/// Overlap event raised by the detector for `this` (the character).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerEvent {
    EnterRange {
        this: EntityId,
        other: EntityId,
        other_kind: EntityKind,
    },
    LeaveRange {
        this: EntityId,
        other: EntityId,
        other_kind: EntityKind,
    },
}

/// Weak, single-slot reference from a character to the interactable in range.
///
/// Holds an id, never the door itself; whoever resolves it must cope with
/// the door being gone.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InteractionBinding {
    slot: Option<EntityId>,
}

impl InteractionBinding {
    pub fn bound(&self) -> Option<EntityId> {
        self.slot
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    /// Overwrites the slot (replicated value arriving on an observer).
    pub fn set(&mut self, slot: Option<EntityId>) {
        self.slot = slot;
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }

    /// Applies an overlap event for `owner`. Returns true if the slot changed.
    ///
    /// Self-overlaps and non-interactable kinds are ignored. Leaving an
    /// entity other than the bound one leaves the slot alone.
    pub fn handle(&mut self, owner: EntityId, event: &TriggerEvent) -> bool {
        match *event {
            TriggerEvent::EnterRange {
                this,
                other,
                other_kind,
            } => {
                if this != owner || other == owner || !other_kind.is_interactable() {
                    return false;
                }
                let changed = self.slot != Some(other);
                self.slot = Some(other);
                changed
            }
            TriggerEvent::LeaveRange {
                this,
                other,
                other_kind,
            } => {
                if this != owner || other == owner || !other_kind.is_interactable() {
                    return false;
                }
                if self.slot == Some(other) {
                    self.slot = None;
                    return true;
                }
                false
            }
        }
    }
}

/// Axis-aligned trigger box around an interactable.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TriggerVolume {
    pub center: Vec3,
    pub half_extents: Vec3,
}

impl TriggerVolume {
    /// Default door trigger.
    pub fn door_at(center: Vec3) -> Self {
        Self {
            center,
            half_extents: Vec3::new(150.0, 100.0, 100.0),
        }
    }

    pub fn contains(&self, p: Vec3) -> bool {
        let d = p.sub(self.center);
        d.x.abs() <= self.half_extents.x
            && d.y.abs() <= self.half_extents.y
            && d.z.abs() <= self.half_extents.z
    }
}

/// Headless overlap detector: emits events on in/out transitions.
#[derive(Debug, Default)]
pub struct ProximityDetector {
    overlapping: BTreeSet<(EntityId, EntityId)>,
}

impl ProximityDetector {
    /// Compares current positions against the previous call and returns the
    /// transitions. Pairs whose character or volume disappeared produce a
    /// leave event.
    pub fn update(
        &mut self,
        characters: &[(EntityId, Vec3)],
        volumes: &[(EntityId, EntityKind, TriggerVolume)],
    ) -> Vec<TriggerEvent> {
        let mut now = BTreeSet::new();
        for (ch, pos) in characters {
            for (other, _, volume) in volumes {
                if ch != other && volume.contains(*pos) {
                    now.insert((*ch, *other));
                }
            }
        }

        let kind_of = |id: EntityId| {
            volumes
                .iter()
                .find(|(v, _, _)| *v == id)
                .map_or(EntityKind::Door, |(_, k, _)| *k)
        };

        let mut events = Vec::new();
        for (this, other) in self.overlapping.difference(&now) {
            events.push(TriggerEvent::LeaveRange {
                this: *this,
                other: *other,
                other_kind: kind_of(*other),
            });
        }
        for (this, other) in now.difference(&self.overlapping) {
            events.push(TriggerEvent::EnterRange {
                this: *this,
                other: *other,
                other_kind: kind_of(*other),
            });
        }
        self.overlapping = now;
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ME: EntityId = EntityId(1);
    const DOOR: EntityId = EntityId(2);

    fn enter(other: EntityId, kind: EntityKind) -> TriggerEvent {
        TriggerEvent::EnterRange {
            this: ME,
            other,
            other_kind: kind,
        }
    }

    fn leave(other: EntityId, kind: EntityKind) -> TriggerEvent {
        TriggerEvent::LeaveRange {
            this: ME,
            other,
            other_kind: kind,
        }
    }

    #[test]
    fn binds_on_enter_and_clears_on_leave() {
        let mut b = InteractionBinding::default();
        assert!(b.handle(ME, &enter(DOOR, EntityKind::Door)));
        assert_eq!(b.bound(), Some(DOOR));
        assert!(b.handle(ME, &leave(DOOR, EntityKind::Door)));
        assert!(b.is_empty());
    }

    #[test]
    fn ignores_self_and_non_interactables() {
        let mut b = InteractionBinding::default();
        assert!(!b.handle(ME, &enter(ME, EntityKind::Door)));
        assert!(!b.handle(ME, &enter(EntityId(9), EntityKind::Character)));
        assert!(b.is_empty());

        b.handle(ME, &enter(DOOR, EntityKind::Door));
        assert!(!b.handle(ME, &leave(EntityId(9), EntityKind::Prop)));
        assert_eq!(b.bound(), Some(DOOR));
    }

    #[test]
    fn leaving_another_door_keeps_binding() {
        let mut b = InteractionBinding::default();
        b.handle(ME, &enter(EntityId(3), EntityKind::Door));
        b.handle(ME, &enter(DOOR, EntityKind::Door));
        assert!(!b.handle(ME, &leave(EntityId(3), EntityKind::Door)));
        assert_eq!(b.bound(), Some(DOOR));
    }

    #[test]
    fn events_for_other_owner_are_ignored() {
        let mut b = InteractionBinding::default();
        let foreign = TriggerEvent::EnterRange {
            this: EntityId(7),
            other: DOOR,
            other_kind: EntityKind::Door,
        };
        assert!(!b.handle(ME, &foreign));
    }

    #[test]
    fn detector_reports_transitions() {
        let mut det = ProximityDetector::default();
        let volumes = [(DOOR, EntityKind::Door, TriggerVolume::door_at(Vec3::ZERO))];

        let ev = det.update(&[(ME, Vec3::new(500.0, 0.0, 0.0))], &volumes);
        assert!(ev.is_empty());

        let ev = det.update(&[(ME, Vec3::new(100.0, 0.0, 0.0))], &volumes);
        assert_eq!(ev, vec![enter(DOOR, EntityKind::Door)]);

        let ev = det.update(&[(ME, Vec3::new(120.0, 10.0, 0.0))], &volumes);
        assert!(ev.is_empty());

        let ev = det.update(&[(ME, Vec3::new(0.0, 300.0, 0.0))], &volumes);
        assert_eq!(ev, vec![leave(DOOR, EntityKind::Door)]);
    }
}
