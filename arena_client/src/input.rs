//! Input handling.
//!
//! In a real game this would integrate with windowing, raw mouse/keyboard
//! and action bindings. Here it only turns sampled input into per-tick
//! `PlayerCommand`s and the interaction vector used for door toggles.

use arena_shared::{math::Vec3, net::PlayerCommand};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct InputState {
    pub forward: f32,
    pub right: f32,
    pub up: f32,
    /// View yaw in degrees.
    pub aim_yaw: f32,
    /// The "use" action was pressed this tick.
    pub action: bool,
}

impl InputState {
    pub fn wish_vector(self) -> Vec3 {
        Vec3::new(self.forward, self.right, self.up)
    }

    /// Direction the player is facing when acting on a door.
    pub fn interaction_vector(self) -> Vec3 {
        Vec3::from_yaw(self.aim_yaw)
    }
}

/// Turns sampled input into a `PlayerCommand` for a tick.
pub fn build_command(tick: u32, input: InputState) -> PlayerCommand {
    PlayerCommand {
        tick,
        wish: input.wish_vector(),
    }
}
