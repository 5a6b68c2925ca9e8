//! Quaternion and Euler-angle algebra used by the control laws.
//!
//! Conventions:
//! - Quaternions are `w, x, y, z` whenever they are flattened into a vector.
//! - Euler angles are ZYX (yaw, then pitch, then roll), body-to-world, so
//!   `R = Rz(yaw) * Ry(pitch) * Rx(roll)`.
//! - Body rates are integrated on the right: `q_next = q * exp(rate * dt / 2)`.
use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Capability interface over unit quaternions needed by the controllers
pub trait QuaternionAlgebra: Sized {
    /// Composition `self * other`
    fn compose(&self, other: &Self) -> Self;
    /// Inverse composition `self^-1 * other`, i.e. the rotation taking `self` onto `other`
    /// expressed in the frame of `self`
    fn inverse_compose(&self, other: &Self) -> Self;
    /// Picks the sign representation closest to identity
    /// # Returns
    /// * The same rotation with `w > 0`; when `w == 0` the first non-zero vector
    ///   component is made positive so that `q` and `-q` always agree
    fn wrap_shortest(&self) -> Self;
    /// Builds a quaternion from `[roll, pitch, yaw]`
    fn from_euler(euler: &Vector3<f64>) -> Self;
    /// Extracts `[roll, pitch, yaw]`
    fn to_euler(&self) -> Vector3<f64>;
    /// Integrates a body rate over `dt` seconds
    /// # Arguments
    /// * `rate` - Body angular rate `[p, q, r]` in rad/s
    /// * `dt` - Integration step in seconds
    /// # Returns
    /// * The propagated, renormalized quaternion
    fn integrate(&self, rate: &Vector3<f64>, dt: f64) -> Self;
}

impl QuaternionAlgebra for UnitQuaternion<f64> {
    #[inline]
    fn compose(&self, other: &Self) -> Self {
        self * other
    }

    #[inline]
    fn inverse_compose(&self, other: &Self) -> Self {
        self.inverse() * other
    }

    fn wrap_shortest(&self) -> Self {
        let q = self.quaternion();
        let flip = if q.w != 0.0 {
            q.w < 0.0
        } else {
            [q.i, q.j, q.k]
                .into_iter()
                .find(|c| *c != 0.0)
                .map_or(false, |c| c < 0.0)
        };
        if flip {
            UnitQuaternion::new_unchecked(-*q)
        } else {
            *self
        }
    }

    #[inline]
    fn from_euler(euler: &Vector3<f64>) -> Self {
        UnitQuaternion::from_euler_angles(euler.x, euler.y, euler.z)
    }

    #[inline]
    fn to_euler(&self) -> Vector3<f64> {
        let (roll, pitch, yaw) = self.euler_angles();
        Vector3::new(roll, pitch, yaw)
    }

    fn integrate(&self, rate: &Vector3<f64>, dt: f64) -> Self {
        let mut q = self * UnitQuaternion::from_scaled_axis(rate * dt);
        q.renormalize();
        q
    }
}

/// Negated representation of the same rotation
#[inline]
pub fn negate(q: &UnitQuaternion<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::new_unchecked(-*q.quaternion())
}

/// Builds a unit quaternion from `w, x, y, z` components, normalizing on the way
/// # Returns
/// * `None` if the components have zero or non-finite norm
pub fn quat_from_wxyz(w: f64, x: f64, y: f64, z: f64) -> Option<UnitQuaternion<f64>> {
    let q = Quaternion::new(w, x, y, z);
    let norm = q.norm();
    if !norm.is_finite() || norm <= f64::EPSILON {
        return None;
    }
    Some(UnitQuaternion::new_normalize(q))
}

/// Flattens a unit quaternion as `[w, x, y, z]`
#[inline]
pub fn quat_to_wxyz(q: &UnitQuaternion<f64>) -> [f64; 4] {
    [q.w, q.i, q.j, q.k]
}
