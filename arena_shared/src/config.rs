//! Configuration system.
//!
//! Loads session configuration from JSON strings/files (file IO left to app).

use serde::{Deserialize, Serialize};

/// Root configuration shared by client/server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    pub server_addr: String,
    /// Fixed simulation tick rate.
    pub tick_hz: u32,
    /// Connected participants needed before the match starts.
    #[serde(default = "default_player_threshold")]
    pub player_threshold: usize,
    /// Number of teams in the session.
    #[serde(default = "default_num_teams")]
    pub num_teams: u8,
    /// Door motion tuning.
    #[serde(default)]
    pub door: DoorConfig,
    /// Seed for spawn selection; entropy when absent.
    #[serde(default)]
    pub spawn_seed: Option<u64>,
    /// Reject toggle requests naming an actor the sender does not control.
    #[serde(default)]
    pub validate_actor_ownership: bool,
    /// Player name (client only).
    #[serde(default = "default_player_name")]
    pub player_name: String,
}

/// Door hinge parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DoorConfig {
    /// Hinge speed in degrees per second.
    pub rate_deg_per_sec: f32,
    /// Rest tolerance in degrees.
    pub tolerance_deg: f32,
    /// Fully open angle in degrees (signed by the side of approach).
    pub open_angle_deg: f32,
}

impl Default for DoorConfig {
    fn default() -> Self {
        Self {
            rate_deg_per_sec: 80.0,
            tolerance_deg: 1.5,
            open_angle_deg: 90.0,
        }
    }
}

fn default_player_threshold() -> usize {
    2
}

fn default_num_teams() -> u8 {
    2
}

fn default_player_name() -> String {
    "Player".to_string()
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:40000".to_string(),
            tick_hz: 64,
            player_threshold: default_player_threshold(),
            num_teams: default_num_teams(),
            door: DoorConfig::default(),
            spawn_seed: None,
            validate_actor_ownership: false,
            player_name: default_player_name(),
        }
    }
}

impl SessionConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    /// Seconds per simulation step.
    pub fn tick_dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_json_fills_defaults() {
        let cfg = SessionConfig::from_json_str(r#"{"server_addr":"0.0.0.0:1","tick_hz":30}"#)
            .unwrap();
        assert_eq!(cfg.player_threshold, 2);
        assert_eq!(cfg.num_teams, 2);
        assert_eq!(cfg.door, DoorConfig::default());
        assert!(!cfg.validate_actor_ownership);
        assert_eq!(cfg.spawn_seed, None);
    }

    #[test]
    fn door_overrides_parse() {
        let cfg = SessionConfig::from_json_str(
            r#"{"server_addr":"0.0.0.0:1","tick_hz":30,
                "door":{"rate_deg_per_sec":120.0,"tolerance_deg":2.0,"open_angle_deg":75.0},
                "player_threshold":4,"spawn_seed":9}"#,
        )
        .unwrap();
        assert_eq!(cfg.door.rate_deg_per_sec, 120.0);
        assert_eq!(cfg.player_threshold, 4);
        assert_eq!(cfg.spawn_seed, Some(9));
    }
}
