//! The elementary control tasks.
//!
//! Every task is an affine system over the optimization vector
//! `x = [v̇; F_c; d_des]`: equalities `A x = b` and/or inequalities
//! `C x ≤ d`, sized to the current contact configuration. Tasks with no
//! applicable rows return zero-height blocks.

use hopt::TaskLevel;
use legged::GeneralizedPose;
use nalgebra::{DMatrix, DVector, Quaternion, UnitQuaternion, Vector3};
use rbd::RigidBodyDynamics;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::{Error, Result};

/// The elementary tasks, in the order of the default priority list.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum TaskName {
    FloatingBaseEom,
    TorqueLimits,
    FrictionAndForceModulation,
    LinearBaseMotionTracking,
    AngularBaseMotionTracking,
    SwingFeetMotionTracking,
    ContactConstraints,
    EnergyAndForcesOptimization,
}

/// How the contact feet are tied to the ground.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum ContactConstraintType {
    /// Contact points do not accelerate.
    #[strum(serialize = "rigid")]
    #[serde(rename = "rigid")]
    Rigid,
    /// Kelvin-Voigt ground: the contact accelerates with the commanded
    /// deformation, and the contact force is algebraically coupled to it.
    #[default]
    #[strum(serialize = "soft_kv")]
    #[serde(rename = "soft_kv")]
    SoftKv,
}

/// Gains and limits of the task set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskGains {
    pub tau_max: f64,
    pub friction_coefficient: f64,
    pub normal_force_min: f64,
    pub normal_force_max: f64,

    pub kp_base_position: Vector3<f64>,
    pub kd_base_position: Vector3<f64>,
    pub kp_base_orientation: Vector3<f64>,
    pub kd_base_orientation: Vector3<f64>,
    pub kp_swing_feet: Vector3<f64>,
    pub kd_swing_feet: Vector3<f64>,

    /// Per-axis stiffness of the algebraic `F_c = K d + D ḋ` coupling.
    pub terrain_stiffness: Vector3<f64>,
    /// Per-axis damping of the algebraic coupling.
    pub terrain_damping: Vector3<f64>,
}

impl Default for TaskGains {
    fn default() -> Self {
        Self {
            tau_max: 80.0,
            friction_coefficient: 0.8,
            normal_force_min: 0.0,
            normal_force_max: 500.0,
            kp_base_position: Vector3::new(100.0, 100.0, 100.0),
            kd_base_position: Vector3::new(20.0, 20.0, 20.0),
            kp_base_orientation: Vector3::new(150.0, 150.0, 150.0),
            kd_base_orientation: Vector3::new(30.0, 30.0, 30.0),
            kp_swing_feet: Vector3::new(200.0, 200.0, 200.0),
            kd_swing_feet: Vector3::new(30.0, 30.0, 30.0),
            terrain_stiffness: Vector3::new(4000.0, 4000.0, 4000.0),
            terrain_damping: Vector3::new(200.0, 200.0, 200.0),
        }
    }
}

impl TaskGains {
    pub fn validate(&self) -> Result<()> {
        if !self.tau_max.is_finite() || self.tau_max <= 0.0 {
            return Err(Error::TauMax(self.tau_max));
        }
        if !self.friction_coefficient.is_finite()
            || !(0.0..=1.0).contains(&self.friction_coefficient)
            || self.friction_coefficient == 0.0
        {
            return Err(Error::FrictionCoefficient(self.friction_coefficient));
        }
        if !self.normal_force_min.is_finite() || self.normal_force_min < 0.0 {
            return Err(Error::NormalForceMin(self.normal_force_min));
        }
        if !self.normal_force_max.is_finite() || self.normal_force_max < self.normal_force_min {
            return Err(Error::NormalForceMax(self.normal_force_max));
        }

        for (name, gains) in [
            ("kp_base_position", &self.kp_base_position),
            ("kd_base_position", &self.kd_base_position),
            ("kp_base_orientation", &self.kp_base_orientation),
            ("kd_base_orientation", &self.kd_base_orientation),
            ("kp_swing_feet", &self.kp_swing_feet),
            ("kd_swing_feet", &self.kd_swing_feet),
            ("terrain_stiffness", &self.terrain_stiffness),
            ("terrain_damping", &self.terrain_damping),
        ] {
            if gains.iter().any(|gain| !gain.is_finite() || *gain < 0.0) {
                return Err(Error::Gains { name });
            }
        }

        Ok(())
    }
}

/// Everything a task build needs for one tick.
pub struct TaskContext<'a, R> {
    pub oracle: &'a R,
    pub q: &'a DVector<f64>,
    pub v: &'a DVector<f64>,
    pub pose: &'a GeneralizedPose,
    /// `d_{k−1}`, aligned to the current contact order.
    pub previous_deformation: &'a DVector<f64>,
    /// `d_{k−2}`, aligned to the current contact order.
    pub older_deformation: &'a DVector<f64>,
}

/// Builds the elementary tasks over the optimization vector.
#[derive(Debug, Clone)]
pub struct ControlTasks {
    gains: TaskGains,
    contact_constraint: ContactConstraintType,
    sample_time: f64,
}

impl ControlTasks {
    pub fn new(
        gains: TaskGains,
        contact_constraint: ContactConstraintType,
        sample_time: f64,
    ) -> Result<Self> {
        gains.validate()?;
        if !sample_time.is_finite() || sample_time <= 0.0 {
            return Err(Error::SampleTime(sample_time));
        }

        Ok(Self {
            gains,
            contact_constraint,
            sample_time,
        })
    }

    #[must_use]
    pub fn gains(&self) -> &TaskGains {
        &self.gains
    }

    /// Replaces the gains; the old set is kept if the new one is invalid.
    pub fn set_gains(&mut self, gains: TaskGains) -> Result<()> {
        gains.validate()?;
        self.gains = gains;
        Ok(())
    }

    #[must_use]
    pub fn contact_constraint(&self) -> ContactConstraintType {
        self.contact_constraint
    }

    pub fn set_contact_constraint(&mut self, contact_constraint: ContactConstraintType) {
        self.contact_constraint = contact_constraint;
    }

    pub fn set_sample_time(&mut self, sample_time: f64) -> Result<()> {
        if !sample_time.is_finite() || sample_time <= 0.0 {
            return Err(Error::SampleTime(sample_time));
        }
        self.sample_time = sample_time;
        Ok(())
    }

    /// Width of the optimization vector for the current contact count.
    #[must_use]
    pub fn width(oracle: &impl RigidBodyDynamics) -> usize {
        oracle.nv() + 6 * oracle.contact_feet().count()
    }

    /// Builds one elementary task.
    #[must_use]
    pub fn build<R: RigidBodyDynamics>(&self, name: TaskName, context: &TaskContext<R>) -> TaskLevel {
        match name {
            TaskName::FloatingBaseEom => self.floating_base_eom(context),
            TaskName::TorqueLimits => self.torque_limits(context),
            TaskName::FrictionAndForceModulation => self.friction_cone(context),
            TaskName::LinearBaseMotionTracking => self.linear_base_tracking(context),
            TaskName::AngularBaseMotionTracking => self.angular_base_tracking(context),
            TaskName::SwingFeetMotionTracking => self.swing_feet_tracking(context),
            TaskName::ContactConstraints => self.contact_constraints(context),
            TaskName::EnergyAndForcesOptimization => self.energy_regularization(context),
        }
    }

    /// Unactuated rows of `M v̇ + h = J_cᵀ F_c`.
    fn floating_base_eom<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let nc = oracle.contact_feet().count();
        let width = Self::width(oracle);

        let mut a = DMatrix::zeros(6, width);
        a.view_mut((0, 0), (6, nv))
            .copy_from(&oracle.mass_matrix().rows(0, 6));
        if nc > 0 {
            a.view_mut((0, nv), (6, 3 * nc))
                .copy_from(&(-oracle.contact_jacobian().columns(0, 6).transpose()));
        }
        let b = -oracle.bias().rows(0, 6).into_owned();

        equality(a, b, width)
    }

    /// `|M_j v̇ + h_j − J_cᵀ_j F_c| ≤ τ_max` on the actuated rows.
    fn torque_limits<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let n_joints = oracle.n_joints();
        let nc = oracle.contact_feet().count();
        let width = Self::width(oracle);

        let mass_actuated = oracle.mass_matrix().rows(6, n_joints);
        let bias_actuated = oracle.bias().rows(6, n_joints);

        let mut c = DMatrix::zeros(2 * n_joints, width);
        c.view_mut((0, 0), (n_joints, nv)).copy_from(&mass_actuated);
        c.view_mut((n_joints, 0), (n_joints, nv))
            .copy_from(&(-mass_actuated));
        if nc > 0 {
            let contact_transpose_actuated =
                oracle.contact_jacobian().columns(6, n_joints).transpose();
            c.view_mut((0, nv), (n_joints, 3 * nc))
                .copy_from(&(-&contact_transpose_actuated));
            c.view_mut((n_joints, nv), (n_joints, 3 * nc))
                .copy_from(&contact_transpose_actuated);
        }

        let limit = DVector::from_element(n_joints, self.gains.tau_max);
        let mut d = DVector::zeros(2 * n_joints);
        d.rows_mut(0, n_joints).copy_from(&(&limit - &bias_actuated));
        d.rows_mut(n_joints, n_joints)
            .copy_from(&(&limit + &bias_actuated));

        inequality(c, d, width)
    }

    /// Pyramidal friction cone plus normal force bounds, per contact foot.
    fn friction_cone<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let nc = oracle.contact_feet().count();
        let width = Self::width(oracle);
        let mu = self.gains.friction_coefficient;

        let mut c = DMatrix::zeros(6 * nc, width);
        let mut d = DVector::zeros(6 * nc);

        for contact in 0..nc {
            let row = 6 * contact;
            let col = nv + 3 * contact;

            // |F_x| ≤ μ F_z and |F_y| ≤ μ F_z
            c[(row, col)] = 1.0;
            c[(row, col + 2)] = -mu;
            c[(row + 1, col)] = -1.0;
            c[(row + 1, col + 2)] = -mu;
            c[(row + 2, col + 1)] = 1.0;
            c[(row + 2, col + 2)] = -mu;
            c[(row + 3, col + 1)] = -1.0;
            c[(row + 3, col + 2)] = -mu;

            // F_z ∈ [F_n_min, F_n_max]
            c[(row + 4, col + 2)] = 1.0;
            d[row + 4] = self.gains.normal_force_max;
            c[(row + 5, col + 2)] = -1.0;
            d[row + 5] = -self.gains.normal_force_min;
        }

        inequality(c, d, width)
    }

    /// PD plus feed-forward tracking of the desired base position.
    fn linear_base_tracking<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let width = Self::width(oracle);
        let pose = context.pose;

        let mut a = DMatrix::zeros(3, width);
        a.view_mut((0, 0), (3, nv))
            .copy_from(&oracle.base_jacobian().rows(0, 3));

        let position = Vector3::new(context.q[0], context.q[1], context.q[2]);
        let velocity = Vector3::new(context.v[0], context.v[1], context.v[2]);

        let feedback = pose.base_acc
            + self
                .gains
                .kd_base_position
                .component_mul(&(pose.base_vel - velocity))
            + self
                .gains
                .kp_base_position
                .component_mul(&(pose.base_pos - position));
        let b = feedback - oracle.base_jdot_v().fixed_rows::<3>(0).into_owned();

        equality(a, DVector::from_column_slice(b.as_slice()), width)
    }

    /// PD tracking of the desired base orientation, on the quaternion log.
    fn angular_base_tracking<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let width = Self::width(oracle);
        let pose = context.pose;

        let mut a = DMatrix::zeros(3, width);
        a.view_mut((0, 0), (3, nv))
            .copy_from(&oracle.base_jacobian().rows(3, 3));

        let q = context.q;
        let measured = UnitQuaternion::from_quaternion(Quaternion::new(q[6], q[3], q[4], q[5]));
        let orientation_error = (pose.base_quat * measured.inverse()).scaled_axis();
        let angular_velocity = Vector3::new(context.v[3], context.v[4], context.v[5]);

        let feedback = self
            .gains
            .kd_base_orientation
            .component_mul(&(pose.base_angvel - angular_velocity))
            + self
                .gains
                .kp_base_orientation
                .component_mul(&orientation_error);
        let b = feedback - oracle.base_jdot_v().fixed_rows::<3>(3).into_owned();

        equality(a, DVector::from_column_slice(b.as_slice()), width)
    }

    /// PD plus feed-forward tracking of the swing feet arcs.
    fn swing_feet_tracking<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let n_swing = oracle.contact_feet().complement().count();
        let width = Self::width(oracle);
        let pose = context.pose;

        if n_swing == 0 {
            return TaskLevel::new(
                DMatrix::zeros(0, width),
                DVector::zeros(0),
                DMatrix::zeros(0, width),
                DVector::zeros(0),
            );
        }

        let mut a = DMatrix::zeros(3 * n_swing, width);
        a.view_mut((0, 0), (3 * n_swing, nv))
            .copy_from(oracle.swing_jacobian());

        let measured_position = oracle.swing_feet_positions();
        let measured_velocity = oracle.swing_jacobian() * context.v;

        let mut b = DVector::zeros(3 * n_swing);
        for foot in 0..n_swing {
            for axis in 0..3 {
                let row = 3 * foot + axis;
                b[row] = pose.feet_acc[row]
                    + self.gains.kd_swing_feet[axis]
                        * (pose.feet_vel[row] - measured_velocity[row])
                    + self.gains.kp_swing_feet[axis]
                        * (pose.feet_pos[row] - measured_position[row])
                    - oracle.swing_jdot_v()[row];
            }
        }

        equality(a, b, width)
    }

    /// Ties the contact feet to the ground, rigidly or through the
    /// Kelvin-Voigt element.
    fn contact_constraints<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let nc = oracle.contact_feet().count();
        let width = Self::width(oracle);

        if nc == 0 {
            return TaskLevel::new(
                DMatrix::zeros(0, width),
                DVector::zeros(0),
                DMatrix::zeros(0, width),
                DVector::zeros(0),
            );
        }

        match self.contact_constraint {
            ContactConstraintType::Rigid => {
                // J_c v̇ + J̇_c v = 0
                let mut a = DMatrix::zeros(3 * nc, width);
                a.view_mut((0, 0), (3 * nc, nv))
                    .copy_from(oracle.contact_jacobian());
                let b = -oracle.contact_jdot_v();

                equality(a, b, width)
            }
            ContactConstraintType::SoftKv => {
                let dt = self.sample_time;
                let dt_squared = dt * dt;
                let d_column = nv + 3 * nc;

                let mut a = DMatrix::zeros(6 * nc, width);
                let mut b = DVector::zeros(6 * nc);

                // J_c v̇ − d_des / Δt² = −J̇_c v − (2 d_{k−1} − d_{k−2}) / Δt²
                a.view_mut((0, 0), (3 * nc, nv))
                    .copy_from(oracle.contact_jacobian());
                for row in 0..3 * nc {
                    a[(row, d_column + row)] = -1.0 / dt_squared;
                    b[row] = -oracle.contact_jdot_v()[row]
                        - (2.0 * context.previous_deformation[row]
                            - context.older_deformation[row])
                            / dt_squared;
                }

                // F_c − (K + D/Δt) d_des = −(D/Δt) d_{k−1}
                for contact in 0..nc {
                    for axis in 0..3 {
                        let row = 3 * nc + 3 * contact + axis;
                        let index = 3 * contact + axis;
                        let stiffness = self.gains.terrain_stiffness[axis];
                        let damping = self.gains.terrain_damping[axis];

                        a[(row, nv + index)] = 1.0;
                        a[(row, d_column + index)] = -(stiffness + damping / dt);
                        b[row] = -(damping / dt) * context.previous_deformation[index];
                    }
                }

                equality(a, b, width)
            }
        }
    }

    /// Low-priority `‖v̇‖² + ‖F_c‖²` regularization.
    fn energy_regularization<R: RigidBodyDynamics>(&self, context: &TaskContext<R>) -> TaskLevel {
        let oracle = context.oracle;
        let nv = oracle.nv();
        let nc = oracle.contact_feet().count();
        let width = Self::width(oracle);
        let rows = nv + 3 * nc;

        let mut a = DMatrix::zeros(rows, width);
        for row in 0..rows {
            a[(row, row)] = 1.0;
        }

        equality(a, DVector::zeros(rows), width)
    }
}

fn equality(a: DMatrix<f64>, b: DVector<f64>, width: usize) -> TaskLevel {
    TaskLevel::new(a, b, DMatrix::zeros(0, width), DVector::zeros(0))
}

fn inequality(c: DMatrix<f64>, d: DVector<f64>, width: usize) -> TaskLevel {
    TaskLevel::new(DMatrix::zeros(0, width), DVector::zeros(0), c, d)
}
