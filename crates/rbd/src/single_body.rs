//! Analytic quadruped model: one rigid body with four massless 3-DoF legs.
//!
//! Each leg is hip roll, hip pitch, knee pitch with point feet. Leg masses
//! are folded into the trunk, so M is block diagonal and h carries only
//! gravity and the gyroscopic term. The `J̇·v` products are obtained by a
//! small finite-difference step on the configuration.

use legged::{Foot, FootSet};
use nalgebra::{DMatrix, DVector, Matrix3, Quaternion, Rotation3, UnitQuaternion, Vector3};

use crate::{Error, Result, RigidBodyDynamics};

const GRAVITY: f64 = 9.81;

/// Finite-difference step for the second-order kinematics.
const FD_STEP: f64 = 1e-6;

/// Geometry and inertia of the single-body quadruped.
#[derive(Debug, Clone, Copy)]
pub struct BodyParams {
    pub mass: f64,
    /// Diagonal trunk inertia in the body frame.
    pub inertia: Vector3<f64>,
    /// Hip mounts sit at `(±half_length, ±half_width)` on the trunk.
    pub half_length: f64,
    pub half_width: f64,
    /// Lateral hip link length.
    pub hip_offset: f64,
    pub upper_leg: f64,
    pub lower_leg: f64,
    /// Reflected rotor inertia per joint.
    pub joint_inertia: f64,
    /// The contact point sits this far below the foot frame.
    pub foot_radius: f64,
}

impl Default for BodyParams {
    fn default() -> Self {
        Self {
            mass: 24.0,
            inertia: Vector3::new(0.4, 1.2, 1.3),
            half_length: 0.36,
            half_width: 0.15,
            hip_offset: 0.08,
            upper_leg: 0.35,
            lower_leg: 0.35,
            joint_inertia: 0.02,
            foot_radius: 0.02,
        }
    }
}

impl BodyParams {
    /// Hip mount of `foot` in the base frame.
    #[must_use]
    pub fn hip(&self, foot: Foot) -> Vector3<f64> {
        let x = if foot.is_front() {
            self.half_length
        } else {
            -self.half_length
        };
        let y = if foot.is_left() {
            self.half_width
        } else {
            -self.half_width
        };
        Vector3::new(x, y, 0.0)
    }

    fn side_sign(foot: Foot) -> f64 {
        if foot.is_left() { 1.0 } else { -1.0 }
    }
}

/// The oracle state refreshed by the compute calls.
pub struct SingleBodyModel {
    params: BodyParams,
    contact: FootSet,

    mass_matrix: DMatrix<f64>,
    bias: DVector<f64>,
    contact_jacobian: DMatrix<f64>,
    base_jacobian: DMatrix<f64>,
    swing_jacobian: DMatrix<f64>,
    contact_jdot_v: DVector<f64>,
    base_jdot_v: DVector<f64>,
    swing_jdot_v: DVector<f64>,
    base_rotation: Rotation3<f64>,
    swing_positions: DVector<f64>,
    feet_positions: [Vector3<f64>; 4],
}

impl SingleBodyModel {
    const N_JOINTS: usize = 12;
    const NV: usize = 6 + Self::N_JOINTS;
    const NQ: usize = 7 + Self::N_JOINTS;

    #[must_use]
    pub fn new(params: BodyParams) -> Self {
        let mut base_jacobian = DMatrix::zeros(6, Self::NV);
        base_jacobian
            .view_mut((0, 0), (6, 6))
            .copy_from(&DMatrix::identity(6, 6));

        Self {
            params,
            contact: FootSet::ALL,
            mass_matrix: DMatrix::zeros(Self::NV, Self::NV),
            bias: DVector::zeros(Self::NV),
            contact_jacobian: DMatrix::zeros(12, Self::NV),
            base_jacobian,
            swing_jacobian: DMatrix::zeros(0, Self::NV),
            contact_jdot_v: DVector::zeros(12),
            base_jdot_v: DVector::zeros(6),
            swing_jdot_v: DVector::zeros(0),
            base_rotation: Rotation3::identity(),
            swing_positions: DVector::zeros(0),
            feet_positions: [Vector3::zeros(); 4],
        }
    }

    #[must_use]
    pub fn params(&self) -> &BodyParams {
        &self.params
    }

    /// World positions of all four feet, canonical order.
    #[must_use]
    pub fn feet_positions(&self) -> &[Vector3<f64>; 4] {
        &self.feet_positions
    }

    /// Joint angles that put a foot directly below its hip link with the
    /// base `height` above the ground (equal-length leg segments).
    #[must_use]
    pub fn standing_joint_angles(&self, height: f64) -> [f64; 3] {
        let reach = self.params.upper_leg + self.params.lower_leg;
        let alpha = ((height - self.params.foot_radius) / reach).clamp(-1.0, 1.0).acos();
        [0.0, alpha, -2.0 * alpha]
    }

    /// Generalized coordinates for a level stance at the given base height.
    #[must_use]
    pub fn standing_q(&self, height: f64) -> DVector<f64> {
        let mut q = DVector::zeros(Self::NQ);
        q[2] = height;
        q[6] = 1.0; // identity quaternion, scalar last

        let [roll, pitch, knee] = self.standing_joint_angles(height);
        for foot in Foot::ALL {
            let base = 7 + 3 * foot.index();
            q[base] = roll;
            q[base + 1] = pitch;
            q[base + 2] = knee;
        }
        q
    }

    /// Contact point of `foot` in the base frame and the 3×3 Jacobian of the
    /// leg joints, also in the base frame.
    fn leg_kinematics(&self, joints: &[f64], foot: Foot) -> (Vector3<f64>, Matrix3<f64>) {
        let p = &self.params;
        let [q1, q2, q3] = [joints[0], joints[1], joints[2]];
        let side = BodyParams::side_sign(foot);

        let roll = Rotation3::from_axis_angle(&Vector3::x_axis(), q1);
        let hip_link = roll * Vector3::new(0.0, side * p.hip_offset, 0.0);
        let upper = roll
            * (Rotation3::from_axis_angle(&Vector3::y_axis(), q2)
                * Vector3::new(0.0, 0.0, -p.upper_leg));
        let lower = roll
            * (Rotation3::from_axis_angle(&Vector3::y_axis(), q2 + q3)
                * Vector3::new(0.0, 0.0, -p.lower_leg));

        let hip = p.hip(foot);
        let foot_frame = hip + hip_link + upper + lower;
        let contact_point = foot_frame - Vector3::new(0.0, 0.0, p.foot_radius);

        // joint axes: hip x, then the rolled pitch axis for both pitch joints
        let pitch_axis = roll * Vector3::y();
        let mut jacobian = Matrix3::zeros();
        jacobian.set_column(0, &Vector3::x().cross(&(foot_frame - hip)));
        jacobian.set_column(1, &pitch_axis.cross(&(upper + lower)));
        jacobian.set_column(2, &pitch_axis.cross(&lower));

        (contact_point, jacobian)
    }

    /// World feet positions and full 3×nv world Jacobians at `q`.
    fn feet_jacobians(&self, q: &DVector<f64>) -> ([Vector3<f64>; 4], [DMatrix<f64>; 4]) {
        let base_pos = Vector3::new(q[0], q[1], q[2]);
        let rotation = base_rotation_from(q);

        let mut positions = [Vector3::zeros(); 4];
        let mut jacobians =
            [(); 4].map(|()| DMatrix::<f64>::zeros(3, Self::NV));

        for foot in Foot::ALL {
            let joints = &q.as_slice()[7 + 3 * foot.index()..10 + 3 * foot.index()];
            let (contact_point, leg_jacobian) = self.leg_kinematics(joints, foot);

            let relative = rotation * contact_point;
            positions[foot.index()] = base_pos + relative;

            let jacobian = &mut jacobians[foot.index()];
            jacobian
                .view_mut((0, 0), (3, 3))
                .copy_from(&Matrix3::identity());
            jacobian
                .view_mut((0, 3), (3, 3))
                .copy_from(&(-relative.cross_matrix()));
            jacobian
                .view_mut((0, 6 + 3 * foot.index()), (3, 3))
                .copy_from(&(rotation * leg_jacobian));
        }

        (positions, jacobians)
    }

    fn stack_rows(
        jacobians: &[DMatrix<f64>; 4],
        feet: FootSet,
    ) -> DMatrix<f64> {
        let mut stacked = DMatrix::zeros(3 * feet.count(), Self::NV);
        for (row, foot) in feet.iter().enumerate() {
            stacked
                .view_mut((3 * row, 0), (3, Self::NV))
                .copy_from(&jacobians[foot.index()]);
        }
        stacked
    }

    fn check_dims(q: &DVector<f64>, v: &DVector<f64>) -> Result<()> {
        if q.len() != Self::NQ {
            return Err(Error::CoordinateDimension {
                expected: Self::NQ,
                actual: q.len(),
            });
        }
        if v.len() != Self::NV {
            return Err(Error::VelocityDimension {
                expected: Self::NV,
                actual: v.len(),
            });
        }
        Ok(())
    }

    /// Integrates the configuration forward by `dt` along `v`.
    fn integrate(q: &DVector<f64>, v: &DVector<f64>, dt: f64) -> DVector<f64> {
        let mut next = q.clone();

        next[0] += v[0] * dt;
        next[1] += v[1] * dt;
        next[2] += v[2] * dt;

        let omega = Vector3::new(v[3], v[4], v[5]);
        let quat = unit_quat_from(q);
        let rotated = UnitQuaternion::from_scaled_axis(omega * dt) * quat;
        next[3] = rotated.i;
        next[4] = rotated.j;
        next[5] = rotated.k;
        next[6] = rotated.w;

        for joint in 0..Self::N_JOINTS {
            next[7 + joint] += v[6 + joint] * dt;
        }
        next
    }
}

fn unit_quat_from(q: &DVector<f64>) -> UnitQuaternion<f64> {
    UnitQuaternion::from_quaternion(Quaternion::new(q[6], q[3], q[4], q[5]))
}

fn base_rotation_from(q: &DVector<f64>) -> Rotation3<f64> {
    unit_quat_from(q).to_rotation_matrix()
}

impl RigidBodyDynamics for SingleBodyModel {
    fn n_joints(&self) -> usize {
        Self::N_JOINTS
    }

    fn set_contact_feet(&mut self, contact: FootSet) {
        self.contact = contact;
    }

    fn contact_feet(&self) -> FootSet {
        self.contact
    }

    fn compute_eom(&mut self, q: &DVector<f64>, v: &DVector<f64>) -> Result<()> {
        Self::check_dims(q, v)?;

        self.base_rotation = base_rotation_from(q);
        let (positions, jacobians) = self.feet_jacobians(q);
        self.feet_positions = positions;

        self.contact_jacobian = Self::stack_rows(&jacobians, self.contact);
        self.swing_jacobian = Self::stack_rows(&jacobians, self.contact.complement());

        let swing = self.contact.complement();
        self.swing_positions = DVector::zeros(3 * swing.count());
        for (row, foot) in swing.iter().enumerate() {
            self.swing_positions
                .rows_mut(3 * row, 3)
                .copy_from(&positions[foot.index()]);
        }

        // block-diagonal mass matrix: trunk translation, trunk rotation, rotors
        let world_inertia = self.base_rotation.matrix()
            * Matrix3::from_diagonal(&self.params.inertia)
            * self.base_rotation.matrix().transpose();

        self.mass_matrix.fill(0.0);
        self.mass_matrix
            .view_mut((0, 0), (3, 3))
            .copy_from(&(Matrix3::identity() * self.params.mass));
        self.mass_matrix
            .view_mut((3, 3), (3, 3))
            .copy_from(&world_inertia);
        for joint in 0..Self::N_JOINTS {
            self.mass_matrix[(6 + joint, 6 + joint)] = self.params.joint_inertia;
        }

        let omega = Vector3::new(v[3], v[4], v[5]);
        self.bias.fill(0.0);
        self.bias[2] = self.params.mass * GRAVITY;
        self.bias
            .rows_mut(3, 3)
            .copy_from(&omega.cross(&(world_inertia * omega)));

        Ok(())
    }

    fn compute_second_order_fk(&mut self, q: &DVector<f64>, v: &DVector<f64>) -> Result<()> {
        Self::check_dims(q, v)?;

        let (_, jacobians) = self.feet_jacobians(q);
        let advanced = Self::integrate(q, v, FD_STEP);
        let (_, advanced_jacobians) = self.feet_jacobians(&advanced);

        let mut jdot_v = [Vector3::zeros(); 4];
        for foot in Foot::ALL {
            let difference =
                (&advanced_jacobians[foot.index()] - &jacobians[foot.index()]) * v / FD_STEP;
            jdot_v[foot.index()] = Vector3::new(difference[0], difference[1], difference[2]);
        }

        let stack = |feet: FootSet| {
            let mut stacked = DVector::zeros(3 * feet.count());
            for (row, foot) in feet.iter().enumerate() {
                stacked.rows_mut(3 * row, 3).copy_from(&jdot_v[foot.index()]);
            }
            stacked
        };
        self.contact_jdot_v = stack(self.contact);
        self.swing_jdot_v = stack(self.contact.complement());
        self.base_jdot_v = DVector::zeros(6);

        Ok(())
    }

    fn mass_matrix(&self) -> &DMatrix<f64> {
        &self.mass_matrix
    }

    fn bias(&self) -> &DVector<f64> {
        &self.bias
    }

    fn contact_jacobian(&self) -> &DMatrix<f64> {
        &self.contact_jacobian
    }

    fn base_jacobian(&self) -> &DMatrix<f64> {
        &self.base_jacobian
    }

    fn swing_jacobian(&self) -> &DMatrix<f64> {
        &self.swing_jacobian
    }

    fn contact_jdot_v(&self) -> &DVector<f64> {
        &self.contact_jdot_v
    }

    fn base_jdot_v(&self) -> &DVector<f64> {
        &self.base_jdot_v
    }

    fn swing_jdot_v(&self) -> &DVector<f64> {
        &self.swing_jdot_v
    }

    fn base_rotation(&self) -> Rotation3<f64> {
        self.base_rotation
    }

    fn swing_feet_positions(&self) -> &DVector<f64> {
        &self.swing_positions
    }
}
