//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! Angles are degrees throughout; yaw is rotation about the vertical (Z) axis.

use serde::{Deserialize, Serialize};

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    /// Local forward axis.
    pub const FORWARD: Self = Self {
        x: 1.0,
        y: 0.0,
        z: 0.0,
    };

    /// Vertical axis; door hinges rotate about it.
    pub const UP: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 1.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    /// Unit vector on the horizontal plane pointing along `yaw_deg`.
    pub fn from_yaw(yaw_deg: f32) -> Self {
        let r = yaw_deg.to_radians();
        Self::new(r.cos(), r.sin(), 0.0)
    }
}

/// Sign of `v` as `-1.0` or `+1.0`.
///
/// Zero (and NaN) map to `+1.0`: a door approached exactly side-on swings
/// the same way as one approached from the front.
pub fn sign_or_positive(v: f32) -> f32 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

/// Whether `a` and `b` differ by at most `tolerance`.
pub fn is_nearly_equal(a: f32, b: f32, tolerance: f32) -> bool {
    (a - b).abs() <= tolerance
}

/// Wraps a yaw angle into `(-180, 180]`.
pub fn normalize_yaw(deg: f32) -> f32 {
    let mut y = deg % 360.0;
    if y > 180.0 {
        y -= 360.0;
    } else if y <= -180.0 {
        y += 360.0;
    }
    y
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_sign_is_positive() {
        assert_eq!(sign_or_positive(0.0), 1.0);
        assert_eq!(sign_or_positive(-0.0), 1.0);
        assert_eq!(sign_or_positive(-3.5), -1.0);
        assert_eq!(sign_or_positive(f32::NAN), 1.0);
    }

    #[test]
    fn yaw_wraps_into_half_open_range() {
        assert_eq!(normalize_yaw(190.0), -170.0);
        assert_eq!(normalize_yaw(-180.0), 180.0);
        assert_eq!(normalize_yaw(540.0), 180.0);
        assert_eq!(normalize_yaw(45.0), 45.0);
    }

    #[test]
    fn forward_from_yaw() {
        let v = Vec3::from_yaw(90.0);
        assert!(v.x.abs() < 1e-6);
        assert!(is_nearly_equal(v.y, 1.0, 1e-6));
    }
}
