//! Quaternion conventions at the sensor boundary.
//!
//! External messages carry quaternions scalar-last `(x, y, z, w)`; internally
//! everything is a [`UnitQuaternion`].

use nalgebra::{Quaternion, UnitQuaternion};

use crate::{Error, QUAT_NORM_TOLERANCE, Result};

/// Builds a [`UnitQuaternion`] from scalar-last components.
///
/// The input must already be unit within [`QUAT_NORM_TOLERANCE`]; it is then
/// renormalized so downstream conversions round-trip exactly.
pub fn from_xyzw(x: f64, y: f64, z: f64, w: f64) -> Result<UnitQuaternion<f64>> {
    let quat = Quaternion::new(w, x, y, z);

    let norm = quat.norm();
    if !norm.is_finite() || (norm - 1.0).abs() > QUAT_NORM_TOLERANCE {
        return Err(Error::NonUnitQuaternion { norm });
    }

    Ok(UnitQuaternion::from_quaternion(quat))
}

/// Scalar-last components of a unit quaternion.
#[must_use]
pub fn to_xyzw(quat: &UnitQuaternion<f64>) -> [f64; 4] {
    [quat.i, quat.j, quat.k, quat.w]
}

/// Yaw of the quaternion, i.e. the rotation of the body x axis around world z.
#[must_use]
pub fn yaw(quat: &UnitQuaternion<f64>) -> f64 {
    2.0 * (quat.w * quat.k + quat.i * quat.j)
        .atan2(1.0 - 2.0 * (quat.j * quat.j + quat.k * quat.k))
}
