//! Spawn selection.
//!
//! Team-aware spawn points are filtered by the participant's team and one is
//! picked uniformly at random. When nothing matches, selection falls back to
//! the platform default policy. Selection never fails: a join must always
//! admit the participant into the world.

use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{ecs::EntityId, math::Vec3, team::TeamId};

/// Spawn point flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpawnKind {
    /// Plain start used by the default policy.
    Default,
    /// Start that declares a team affinity.
    TeamAware,
}

/// A place a character can enter the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnPoint {
    pub position: Vec3,
    pub yaw: f32,
    pub kind: SpawnKind,
    /// Declared affinity; `None` means any team.
    pub team: Option<TeamId>,
}

impl SpawnPoint {
    pub fn new(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            yaw,
            kind: SpawnKind::Default,
            team: None,
        }
    }

    pub fn for_team(position: Vec3, yaw: f32, team: TeamId) -> Self {
        Self {
            position,
            yaw,
            kind: SpawnKind::TeamAware,
            team: Some(team),
        }
    }

    /// Whether this start admits `team` under the team-aware filter.
    pub fn admits(&self, team: TeamId) -> bool {
        self.kind == SpawnKind::TeamAware && self.team == Some(team)
    }
}

/// How a spawn location was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnSource {
    TeamMatch,
    Fallback,
    /// No spawn points at all; the world origin.
    Origin,
}

/// Result of spawn selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnLocation {
    pub point: Option<EntityId>,
    pub position: Vec3,
    pub yaw: f32,
    pub source: SpawnSource,
}

impl SpawnLocation {
    fn at(id: EntityId, point: &SpawnPoint, source: SpawnSource) -> Self {
        Self {
            point: Some(id),
            position: point.position,
            yaw: point.yaw,
            source,
        }
    }
}

/// Unconstrained selection used when no team-aware start matches.
pub trait DefaultSpawnPolicy: Send {
    fn choose(&mut self, points: &[(EntityId, SpawnPoint)]) -> Option<(EntityId, SpawnPoint)>;
}

/// First plain start in id order, else the first start of any kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct FirstPlainStart;

impl DefaultSpawnPolicy for FirstPlainStart {
    fn choose(&mut self, points: &[(EntityId, SpawnPoint)]) -> Option<(EntityId, SpawnPoint)> {
        points
            .iter()
            .find(|(_, p)| p.kind == SpawnKind::Default)
            .or_else(|| points.first())
            .copied()
    }
}

/// Team-aware spawn selector.
pub struct SpawnSelector {
    rng: StdRng,
    fallback: Box<dyn DefaultSpawnPolicy>,
}

impl SpawnSelector {
    /// Creates a selector; a seed makes picks reproducible.
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            fallback: Box::new(FirstPlainStart),
        }
    }

    pub fn with_fallback(mut self, fallback: Box<dyn DefaultSpawnPolicy>) -> Self {
        self.fallback = fallback;
        self
    }

    /// Picks a start for a participant already assigned to `team`.
    pub fn choose<'a>(
        &mut self,
        team: TeamId,
        points: impl IntoIterator<Item = (EntityId, &'a SpawnPoint)>,
    ) -> SpawnLocation {
        let all: Vec<(EntityId, SpawnPoint)> =
            points.into_iter().map(|(id, p)| (id, *p)).collect();

        let matching: Vec<&(EntityId, SpawnPoint)> =
            all.iter().filter(|(_, p)| p.admits(team)).collect();

        if let Some((id, point)) = matching.choose(&mut self.rng).copied() {
            return SpawnLocation::at(*id, point, SpawnSource::TeamMatch);
        }

        debug!(team = ?team, candidates = all.len(), "No team start matched, using default policy");
        match self.fallback.choose(&all) {
            Some((id, point)) => SpawnLocation::at(id, &point, SpawnSource::Fallback),
            None => SpawnLocation {
                point: None,
                position: Vec3::ZERO,
                yaw: 0.0,
                source: SpawnSource::Origin,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points() -> Vec<(EntityId, SpawnPoint)> {
        vec![
            (EntityId(1), SpawnPoint::new(Vec3::new(0.0, 0.0, 0.0), 0.0)),
            (EntityId(2), SpawnPoint::for_team(Vec3::new(10.0, 0.0, 0.0), 0.0, TeamId(0))),
            (EntityId(3), SpawnPoint::for_team(Vec3::new(20.0, 0.0, 0.0), 0.0, TeamId(0))),
            (EntityId(4), SpawnPoint::for_team(Vec3::new(-10.0, 0.0, 0.0), 180.0, TeamId(1))),
        ]
    }

    #[test]
    fn picks_only_matching_team_starts() {
        let pts = points();
        let mut sel = SpawnSelector::new(Some(7));
        for _ in 0..50 {
            let loc = sel.choose(TeamId(0), pts.iter().map(|(id, p)| (*id, p)));
            assert_eq!(loc.source, SpawnSource::TeamMatch);
            assert!(matches!(loc.point, Some(EntityId(2)) | Some(EntityId(3))));
        }
        let loc = sel.choose(TeamId(1), pts.iter().map(|(id, p)| (*id, p)));
        assert_eq!(loc.point, Some(EntityId(4)));
        assert_eq!(loc.yaw, 180.0);
    }

    #[test]
    fn random_pick_covers_every_match() {
        let pts = points();
        let mut sel = SpawnSelector::new(Some(42));
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let loc = sel.choose(TeamId(0), pts.iter().map(|(id, p)| (*id, p)));
            seen.extend(loc.point);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn unmatched_team_falls_back_to_plain_start() {
        let pts = points();
        let mut sel = SpawnSelector::new(Some(1));
        let loc = sel.choose(TeamId(5), pts.iter().map(|(id, p)| (*id, p)));
        assert_eq!(loc.source, SpawnSource::Fallback);
        assert_eq!(loc.point, Some(EntityId(1)));
    }

    #[test]
    fn team_starts_without_plain_start_still_admit() {
        let pts: Vec<_> = points().into_iter().skip(1).collect();
        let mut sel = SpawnSelector::new(Some(1));
        let loc = sel.choose(TeamId(3), pts.iter().map(|(id, p)| (*id, p)));
        assert_eq!(loc.source, SpawnSource::Fallback);
        assert_eq!(loc.point, Some(EntityId(2)));
    }

    #[test]
    fn empty_world_spawns_at_origin() {
        let mut sel = SpawnSelector::new(None);
        let loc = sel.choose(TeamId(0), std::iter::empty());
        assert_eq!(loc.source, SpawnSource::Origin);
        assert_eq!(loc.position, Vec3::ZERO);
    }
}
