//! "Changed enough" checks shared by the broadcast policy and client reconciliation.
//!
//! Both sides must agree on what counts as a change, so every comparison of
//! positions and orientations goes through [`ChangeThreshold`].

use glam::{Quat, Vec3};

/// Component-wise distance between two values of the same shape.
pub trait ChangeThreshold: Copy {
    /// Largest absolute per-component difference.
    fn max_component_delta(&self, other: &Self) -> f32;

    /// True when any component differs by strictly more than `epsilon`.
    /// NaN on either side always counts as a change.
    fn exceeds(&self, other: &Self, epsilon: f32) -> bool {
        let delta = self.max_component_delta(other);
        delta.is_nan() || delta > epsilon
    }
}

impl ChangeThreshold for Vec3 {
    fn max_component_delta(&self, other: &Self) -> f32 {
        let d = (*self - *other).abs();
        if d.is_nan() {
            return f32::NAN;
        }
        d.max_element()
    }
}

impl ChangeThreshold for Quat {
    fn max_component_delta(&self, other: &Self) -> f32 {
        // q and -q are the same rotation; compare against the aligned sign.
        let other = if self.dot(*other) < 0.0 { -*other } else { *other };
        let a = self.to_array();
        let b = other.to_array();
        let mut max = 0.0f32;
        for i in 0..4 {
            let d = (a[i] - b[i]).abs();
            if d.is_nan() {
                return f32::NAN;
            }
            max = max.max(d);
        }
        max
    }
}

/// Rotation angle (radians) between two orientations.
pub fn rotation_angle(a: Quat, b: Quat) -> f32 {
    let dot = a.dot(b).abs().min(1.0);
    2.0 * dot.acos()
}
