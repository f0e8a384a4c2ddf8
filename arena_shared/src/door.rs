//! Door state machine.
//!
//! A door swings about its vertical hinge between closed (yaw 0) and open
//! (yaw `target_angle`, whose sign depends on which side it was opened from).
//!
//! Motion is recomputed from the actuator's live yaw on every tick instead of
//! being integrated from stored state. A door nudged by something else still
//! converges, and an observer that only learns `is_opening = true` starts
//! converging from wherever its mesh currently sits.
//!
//! Only the host flips `is_open`. Observers run [`Door::on_toggled`] when the
//! replicated `is_open` arrives and then advance on their own.

use serde::{Deserialize, Serialize};

use crate::{
    config::DoorConfig,
    math::{is_nearly_equal, normalize_yaw, sign_or_positive, Vec3},
    sync::{Field, SyncValue},
};

/// Hinge half of the door mesh, owned by the engine.
pub trait MeshActuator: Send + Sync {
    /// Current yaw relative to the closed pose, in degrees.
    fn relative_yaw(&self) -> f32;
    /// Rotates about the vertical axis by `delta_deg`.
    fn add_relative_yaw(&mut self, delta_deg: f32);
}

/// Headless hinge that just stores its yaw.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Hinge {
    yaw: f32,
}

impl Hinge {
    pub fn at(yaw: f32) -> Self {
        Self {
            yaw: normalize_yaw(yaw),
        }
    }
}

impl MeshActuator for Hinge {
    fn relative_yaw(&self) -> f32 {
        self.yaw
    }

    fn add_relative_yaw(&mut self, delta_deg: f32) {
        self.yaw = normalize_yaw(self.yaw + delta_deg);
    }
}

/// Observable phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoorPhase {
    Closed,
    Opening,
    Closing,
    Open,
}

/// Replicated door state. `is_opening` and `is_closing` are never both true.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DoorState {
    pub is_open: bool,
    pub is_opening: bool,
    pub is_closing: bool,
    /// `-1` or `+1` once toggled; `0` before the first toggle.
    pub sign_of_approach: f32,
    pub target_angle: f32,
    pub interaction_vector: Vec3,
}

impl DoorState {
    pub fn is_at_rest(&self) -> bool {
        !self.is_opening && !self.is_closing
    }

    pub fn phase(&self) -> DoorPhase {
        match (self.is_opening, self.is_closing, self.is_open) {
            (true, _, _) => DoorPhase::Opening,
            (_, true, _) => DoorPhase::Closing,
            (false, false, true) => DoorPhase::Open,
            (false, false, false) => DoorPhase::Closed,
        }
    }

    /// Replicated value of one door field.
    pub fn field(&self, field: Field) -> Option<SyncValue> {
        Some(match field {
            Field::IsOpen => SyncValue::Bool(self.is_open),
            Field::IsOpening => SyncValue::Bool(self.is_opening),
            Field::IsClosing => SyncValue::Bool(self.is_closing),
            Field::SignOfApproach => SyncValue::Float(self.sign_of_approach),
            Field::TargetAngle => SyncValue::Float(self.target_angle),
            Field::InteractionVector => SyncValue::Vec3(self.interaction_vector),
            _ => return None,
        })
    }

    /// Every replicated door field with its current value.
    pub fn fields(&self) -> Vec<(Field, SyncValue)> {
        [
            Field::IsOpen,
            Field::IsOpening,
            Field::IsClosing,
            Field::SignOfApproach,
            Field::TargetAngle,
            Field::InteractionVector,
        ]
        .into_iter()
        .filter_map(|f| self.field(f).map(|v| (f, v)))
        .collect()
    }
}

/// What one [`Door::advance`] call did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Already at rest; nothing to do.
    Idle,
    /// Rotated by this many degrees.
    Moved(f32),
    /// Reached the rest pose this tick.
    Settled(DoorPhase),
}

/// A door: replicated state, hinge geometry and the mesh actuator.
pub struct Door<A: MeshActuator = Hinge> {
    state: DoorState,
    /// Local forward axis of the door frame.
    forward: Vec3,
    actuator: A,
    params: DoorConfig,
}

impl Door<Hinge> {
    pub fn new(forward: Vec3, params: DoorConfig) -> Self {
        Self::with_actuator(forward, params, Hinge::default())
    }
}

impl<A: MeshActuator> Door<A> {
    pub fn with_actuator(forward: Vec3, params: DoorConfig, actuator: A) -> Self {
        Self {
            state: DoorState::default(),
            forward,
            actuator,
            params,
        }
    }

    pub fn state(&self) -> &DoorState {
        &self.state
    }

    pub fn forward(&self) -> Vec3 {
        self.forward
    }

    pub fn actuator(&self) -> &A {
        &self.actuator
    }

    pub fn actuator_mut(&mut self) -> &mut A {
        &mut self.actuator
    }

    /// Live hinge angle read back from the actuator.
    pub fn current_angle(&self) -> f32 {
        self.actuator.relative_yaw()
    }

    pub fn phase(&self) -> DoorPhase {
        self.state.phase()
    }

    pub fn is_at_rest(&self) -> bool {
        self.state.is_at_rest()
    }

    /// Records the direction of the triggering action.
    pub fn store_interaction(&mut self, interaction_vector: Vec3) {
        self.state.interaction_vector = interaction_vector;
    }

    /// Host-side toggle: flips `is_open`, fixes the swing side from
    /// `interaction_vector` and starts moving immediately.
    pub fn toggle_authoritative(&mut self, interaction_vector: Vec3) {
        self.store_interaction(interaction_vector);
        self.state.is_open = !self.state.is_open;
        self.state.sign_of_approach = sign_or_positive(self.forward.dot(interaction_vector));
        self.state.target_angle = self.state.sign_of_approach * self.params.open_angle_deg;
        self.on_toggled();
    }

    /// Reaction to `is_open` changing. Runs on the host right after the flip
    /// and on observers when the replicated flag arrives.
    pub fn on_toggled(&mut self) {
        if self.state.is_open {
            self.state.is_closing = false;
            self.state.is_opening = true;
        } else {
            self.state.is_opening = false;
            self.state.is_closing = true;
        }
    }

    /// Advances one fixed step of `dt` seconds.
    pub fn advance(&mut self, dt: f32) -> Step {
        let current = self.current_angle();
        let tolerance = self.params.tolerance_deg;
        let speed = dt * self.params.rate_deg_per_sec;

        if self.state.is_opening {
            if is_nearly_equal(current, self.state.target_angle, tolerance) {
                self.state.is_opening = false;
                return Step::Settled(self.phase());
            }
            let sign = self.state.sign_of_approach;
            let remaining = self.state.target_angle - current;
            // Never step past the target; a coarse dt would otherwise orbit it.
            let magnitude = if remaining * sign > 0.0 {
                speed.min(remaining.abs())
            } else {
                speed
            };
            let delta = sign * magnitude;
            self.actuator.add_relative_yaw(delta);
            Step::Moved(delta)
        } else if self.state.is_closing {
            // Direction comes from the live angle, not from sign_of_approach.
            let direction = if current > 0.0 { -1.0 } else { 1.0 };
            if is_nearly_equal(current, 0.0, tolerance) {
                self.state.is_closing = false;
                return Step::Settled(self.phase());
            }
            let delta = direction * speed.min(current.abs());
            self.actuator.add_relative_yaw(delta);
            Step::Moved(delta)
        } else {
            Step::Idle
        }
    }

    /// Whether the hinge sits at the rest pose implied by `is_open`.
    pub fn is_at_rest_pose(&self) -> bool {
        let rest = if self.state.is_open {
            self.state.target_angle
        } else {
            0.0
        };
        is_nearly_equal(self.current_angle(), rest, self.params.tolerance_deg)
    }

    /// Observer: stores one replicated field.
    ///
    /// Returns true when the on-toggled reaction should run (`is_open`
    /// changed). Motion flags keep the exclusivity invariant: a replicated
    /// `true` enters that motion, a replicated `false` only stops a motion
    /// whose rest pose has already been reached, otherwise the local tick
    /// finishes converging.
    pub fn apply_replicated(&mut self, field: Field, value: &SyncValue) -> bool {
        match field {
            Field::IsOpen => {
                let Some(open) = value.as_bool() else {
                    return false;
                };
                let changed = open != self.state.is_open;
                self.state.is_open = open;
                changed
            }
            Field::IsOpening => {
                match value.as_bool() {
                    Some(true) => {
                        self.state.is_closing = false;
                        self.state.is_opening = true;
                    }
                    Some(false) if self.state.is_opening => {
                        if is_nearly_equal(
                            self.current_angle(),
                            self.state.target_angle,
                            self.params.tolerance_deg,
                        ) {
                            self.state.is_opening = false;
                        }
                    }
                    _ => {}
                }
                false
            }
            Field::IsClosing => {
                match value.as_bool() {
                    Some(true) => {
                        self.state.is_opening = false;
                        self.state.is_closing = true;
                    }
                    Some(false) if self.state.is_closing => {
                        if is_nearly_equal(self.current_angle(), 0.0, self.params.tolerance_deg) {
                            self.state.is_closing = false;
                        }
                    }
                    _ => {}
                }
                false
            }
            Field::SignOfApproach => {
                if let Some(v) = value.as_float() {
                    self.state.sign_of_approach = v;
                }
                false
            }
            Field::TargetAngle => {
                if let Some(v) = value.as_float() {
                    self.state.target_angle = v;
                }
                false
            }
            Field::InteractionVector => {
                if let Some(v) = value.as_vec3() {
                    self.state.interaction_vector = v;
                }
                false
            }
            _ => false,
        }
    }

    /// After an observer settles on its own, a pose that drifted from the
    /// replicated `is_open` restarts the matching motion.
    pub fn resume_if_unsettled(&mut self) -> bool {
        if self.is_at_rest() && !self.is_at_rest_pose() {
            self.on_toggled();
            return true;
        }
        false
    }
}
