//! Session controller.
//!
//! Counts connected participants and starts the match the moment the
//! configured threshold is reached. The transition is one-shot:
//! `WaitingForPlayers -> Active`, never back, no matter how often the
//! population later crosses the threshold again.
//!
//! Also owns the session-wide replicated aggregates: team count and scores.

use chrono::Utc;
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    event::MatchStarted,
    sync::{Field, SyncValue},
    team::TeamId,
};

/// Session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    WaitingForPlayers,
    Active,
}

pub struct SessionController {
    threshold: usize,
    connected: usize,
    phase: SessionPhase,
    started: Option<MatchStarted>,
    num_teams: u8,
    scores: Vec<i32>,
    match_tx: broadcast::Sender<MatchStarted>,
}

impl SessionController {
    pub fn new(threshold: usize, num_teams: u8) -> Self {
        let (match_tx, _) = broadcast::channel(8);
        let num_teams = num_teams.max(1);
        Self {
            threshold,
            connected: 0,
            phase: SessionPhase::WaitingForPlayers,
            started: None,
            num_teams,
            scores: vec![0; num_teams as usize],
            match_tx,
        }
    }

    /// Subscribes to the match-start notification.
    pub fn subscribe(&self) -> broadcast::Receiver<MatchStarted> {
        self.match_tx.subscribe()
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn connected(&self) -> usize {
        self.connected
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// When the match started, if it has.
    pub fn started(&self) -> Option<&MatchStarted> {
        self.started.as_ref()
    }

    /// Records a join. Returns the notification if this join started the match.
    pub fn participant_joined(&mut self) -> Option<MatchStarted> {
        self.connected += 1;
        if self.phase != SessionPhase::WaitingForPlayers || self.connected < self.threshold {
            return None;
        }

        let started = MatchStarted {
            at: Utc::now(),
            participants: self.connected,
        };
        self.phase = SessionPhase::Active;
        self.started = Some(started);
        info!(participants = self.connected, threshold = self.threshold, "Match started");
        // No subscribers is fine.
        let _ = self.match_tx.send(started);
        Some(started)
    }

    pub fn participant_left(&mut self) {
        self.connected = self.connected.saturating_sub(1);
    }

    pub fn num_teams(&self) -> u8 {
        self.num_teams
    }

    pub fn scores(&self) -> &[i32] {
        &self.scores
    }

    /// Adds `points` to a team's score. Unknown teams are ignored.
    pub fn award(&mut self, team: TeamId, points: i32) -> bool {
        match self.scores.get_mut(team.index()) {
            Some(score) => {
                *score += points;
                true
            }
            None => false,
        }
    }

    /// Replicated session aggregate fields.
    pub fn fields(&self) -> Vec<(Field, SyncValue)> {
        vec![
            (Field::NumTeams, SyncValue::Count(self.num_teams)),
            (Field::TeamScores, SyncValue::Scores(self.scores.clone())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_start_fires_once_across_recrossings() {
        let mut s = SessionController::new(2, 2);
        let mut rx = s.subscribe();

        assert!(s.participant_joined().is_none()); // A
        let fired = s.participant_joined(); // B
        assert!(fired.is_some());
        assert_eq!(fired.map(|m| m.participants), Some(2));
        assert!(s.participant_joined().is_none()); // C
        s.participant_left(); // A leaves
        assert!(s.participant_joined().is_none()); // D
        s.participant_left();
        s.participant_left();
        assert!(s.participant_joined().is_none());

        assert_eq!(s.phase(), SessionPhase::Active);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn every_subscriber_hears_the_start() {
        let mut s = SessionController::new(1, 2);
        let mut a = s.subscribe();
        let mut b = s.subscribe();
        s.participant_joined();
        assert!(a.try_recv().is_ok());
        assert!(b.try_recv().is_ok());
    }

    #[test]
    fn leaving_never_goes_negative() {
        let mut s = SessionController::new(2, 2);
        s.participant_left();
        assert_eq!(s.connected(), 0);
        assert_eq!(s.phase(), SessionPhase::WaitingForPlayers);
    }

    #[test]
    fn scores_are_per_team() {
        let mut s = SessionController::new(2, 2);
        assert!(s.award(TeamId(1), 3));
        assert!(!s.award(TeamId(4), 1));
        assert_eq!(s.scores(), &[0, 3]);
        assert_eq!(s.fields()[1].1, SyncValue::Scores(vec![0, 3]));
    }
}
