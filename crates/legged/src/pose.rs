//! The planner→controller contract.

use nalgebra::{DVector, UnitQuaternion, Vector3};

use crate::{Error, FootSet, Result};

/// Desired generalized pose computed by the motion planner and tracked by the
/// whole-body controller.
///
/// Swing-feet quantities are stacked three entries per swing foot, in the
/// canonical order of [`crate::Foot::ALL`] restricted to the swing set.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneralizedPose {
    // Base linear quantities
    pub base_pos: Vector3<f64>,
    pub base_vel: Vector3<f64>,
    pub base_acc: Vector3<f64>,

    // Base angular quantities
    pub base_quat: UnitQuaternion<f64>,
    pub base_angvel: Vector3<f64>,

    // Swing feet linear quantities
    pub feet_pos: DVector<f64>,
    pub feet_vel: DVector<f64>,
    pub feet_acc: DVector<f64>,

    /// Feet in contact with the ground for the next tick.
    pub contact_feet: FootSet,
}

impl Default for GeneralizedPose {
    fn default() -> Self {
        Self {
            base_pos: Vector3::zeros(),
            base_vel: Vector3::zeros(),
            base_acc: Vector3::zeros(),
            base_quat: UnitQuaternion::identity(),
            base_angvel: Vector3::zeros(),
            feet_pos: DVector::zeros(0),
            feet_vel: DVector::zeros(0),
            feet_acc: DVector::zeros(0),
            contact_feet: FootSet::ALL,
        }
    }
}

impl GeneralizedPose {
    /// The feet currently in swing phase.
    #[must_use]
    pub fn swing_feet(&self) -> FootSet {
        self.contact_feet.complement()
    }

    /// Checks the structural invariants of the pose.
    ///
    /// The swing-feet vectors must hold three entries per swing foot and all
    /// quantities must be finite.
    pub fn validate(&self) -> Result<()> {
        let expected = 3 * self.swing_feet().count();

        for (what, vector) in [
            ("feet_pos", &self.feet_pos),
            ("feet_vel", &self.feet_vel),
            ("feet_acc", &self.feet_acc),
        ] {
            if vector.len() != expected {
                return Err(Error::DimensionMismatch {
                    what,
                    expected,
                    actual: vector.len(),
                });
            }
            if !vector.iter().all(|x| x.is_finite()) {
                return Err(Error::NonFinite { what });
            }
        }

        let finite = self.base_pos.iter().all(|x| x.is_finite())
            && self.base_vel.iter().all(|x| x.is_finite())
            && self.base_acc.iter().all(|x| x.is_finite())
            && self.base_angvel.iter().all(|x| x.is_finite());
        if !finite {
            return Err(Error::NonFinite { what: "base" });
        }

        let norm = self.base_quat.as_ref().norm();
        if (norm - 1.0).abs() > 1e-9 {
            return Err(Error::NonUnitQuaternion { norm });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::Foot;

    use super::*;

    #[test]
    fn default_pose_is_a_valid_stance() {
        let pose = GeneralizedPose::default();
        pose.validate().unwrap();
        assert_eq!(pose.contact_feet, FootSet::ALL);
        assert!(pose.swing_feet().is_empty());
    }

    #[test]
    fn swing_vectors_must_match_the_swing_set() {
        let mut pose = GeneralizedPose {
            contact_feet: FootSet::LEFT_DIAGONAL,
            ..GeneralizedPose::default()
        };
        assert!(pose.validate().is_err());

        pose.feet_pos = DVector::zeros(6);
        pose.feet_vel = DVector::zeros(6);
        pose.feet_acc = DVector::zeros(6);
        pose.validate().unwrap();
        assert_eq!(pose.swing_feet().count(), 2);
        assert!(pose.swing_feet().contains(Foot::RightFront));
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let pose = GeneralizedPose {
            base_vel: Vector3::new(0.0, f64::NAN, 0.0),
            ..GeneralizedPose::default()
        };
        assert!(pose.validate().is_err());
    }
}
