//! Team assignment.
//!
//! Runs on the host only, once per life, at the moment a participant is given
//! a spawn. Counting is a pure scan of the live participant list; the host's
//! single-threaded step serializes the count and the following assignment.

use serde::{Deserialize, Serialize};

use crate::participant::Participant;

/// Team index, `0..num_teams`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(pub u8);

impl TeamId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Per-team head counts of participants that already hold a team.
///
/// Unassigned participants (including the one being placed) are not counted.
pub fn team_counts<'a>(
    participants: impl IntoIterator<Item = &'a Participant>,
    num_teams: u8,
) -> Vec<usize> {
    let mut counts = vec![0usize; num_teams.max(1) as usize];
    for team in participants.into_iter().filter_map(|p| p.team) {
        if let Some(slot) = counts.get_mut(team.index()) {
            *slot += 1;
        }
    }
    counts
}

/// Picks the least populated team; ties go to the lowest team id.
pub fn choose_team<'a>(
    participants: impl IntoIterator<Item = &'a Participant>,
    num_teams: u8,
) -> TeamId {
    if num_teams <= 2 {
        return choose_of_two(participants, num_teams);
    }

    let counts = team_counts(participants, num_teams);
    let mut best = 0usize;
    for (idx, count) in counts.iter().enumerate() {
        if *count < counts[best] {
            best = idx;
        }
    }
    TeamId(best as u8)
}

/// Two-team case: count team 0, everyone else assigned is team 1.
fn choose_of_two<'a>(
    participants: impl IntoIterator<Item = &'a Participant>,
    num_teams: u8,
) -> TeamId {
    if num_teams < 2 {
        return TeamId(0);
    }
    let mut assigned = 0usize;
    let mut team0 = 0usize;
    for team in participants.into_iter().filter_map(|p| p.team) {
        assigned += 1;
        if team == TeamId(0) {
            team0 += 1;
        }
    }
    let team1 = assigned - team0;
    if team0 <= team1 {
        TeamId(0)
    } else {
        TeamId(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::ParticipantId;

    fn with_team(id: u32, team: Option<u8>) -> Participant {
        let mut p = Participant::new(ParticipantId(id), format!("p{id}"));
        p.team = team.map(TeamId);
        p
    }

    #[test]
    fn empty_session_picks_team_zero() {
        let none: [Participant; 0] = [];
        assert_eq!(choose_team(&none, 2), TeamId(0));
    }

    #[test]
    fn tie_breaks_toward_team_zero() {
        let ps = [with_team(1, Some(0)), with_team(2, Some(1))];
        assert_eq!(choose_team(&ps, 2), TeamId(0));
    }

    #[test]
    fn unassigned_newcomer_is_not_counted() {
        let ps = [with_team(1, Some(0)), with_team(2, None)];
        assert_eq!(choose_team(&ps, 2), TeamId(1));
    }

    #[test]
    fn sequential_joins_stay_balanced() {
        let mut ps: Vec<Participant> = Vec::new();
        for id in 0..25 {
            let team = choose_team(&ps, 2);
            ps.push(with_team(id, Some(team.0)));
            let counts = team_counts(&ps, 2);
            assert!(counts[0].abs_diff(counts[1]) <= 1, "{counts:?}");
        }
    }

    #[test]
    fn many_teams_fill_lowest_first() {
        let ps = [
            with_team(1, Some(0)),
            with_team(2, Some(1)),
            with_team(3, Some(0)),
        ];
        assert_eq!(choose_team(&ps, 3), TeamId(2));
        assert_eq!(team_counts(&ps, 3), vec![2, 1, 0]);
    }
}
