//! The whole-body controller orchestrator.

use hopt::{Diagnostics, HierarchicalQp};
use legged::{GeneralizedPose, quat};
use nalgebra::DVector;
use rbd::RigidBodyDynamics;
use tracing::debug;

use crate::{
    Result,
    history::DeformationHistory,
    prioritized::PrioritizedTasks,
    tasks::TaskContext,
};

/// Drives the task builder, the priority stacking and the cascade each tick,
/// and extracts the joint torques from the solution.
pub struct WholeBodyController<R> {
    oracle: R,
    tasks: PrioritizedTasks,
    solver: HierarchicalQp,
    history: DeformationHistory,

    x_opt: DVector<f64>,
    tau_opt: DVector<f64>,
    contact_forces_opt: DVector<f64>,
    deformations_opt: DVector<f64>,
    diagnostics: Diagnostics,
}

impl<R: RigidBodyDynamics> WholeBodyController<R> {
    #[must_use]
    pub fn new(oracle: R, tasks: PrioritizedTasks) -> Self {
        Self::with_solver(oracle, tasks, HierarchicalQp::default())
    }

    #[must_use]
    pub fn with_solver(oracle: R, tasks: PrioritizedTasks, solver: HierarchicalQp) -> Self {
        let n_joints = oracle.n_joints();
        Self {
            oracle,
            tasks,
            solver,
            history: DeformationHistory::new(),
            x_opt: DVector::zeros(0),
            tau_opt: DVector::zeros(n_joints),
            contact_forces_opt: DVector::zeros(0),
            deformations_opt: DVector::zeros(0),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Runs one control tick.
    ///
    /// Validates the measured state, refreshes the dynamics oracle for the
    /// pose's contact set, solves the cascade and slices the optimum into
    /// accelerations, contact forces and deformations.
    pub fn step(
        &mut self,
        q: &DVector<f64>,
        v: &DVector<f64>,
        pose: &GeneralizedPose,
    ) -> Result<()> {
        pose.validate()?;
        if q.len() != self.oracle.nq() {
            return Err(legged::Error::DimensionMismatch {
                what: "q",
                expected: self.oracle.nq(),
                actual: q.len(),
            }
            .into());
        }
        if v.len() != self.oracle.nv() {
            return Err(legged::Error::DimensionMismatch {
                what: "v",
                expected: self.oracle.nv(),
                actual: v.len(),
            }
            .into());
        }
        quat::from_xyzw(q[3], q[4], q[5], q[6])?;
        self.oracle.set_contact_feet(pose.contact_feet);
        self.oracle.compute_eom(q, v)?;
        self.oracle.compute_second_order_fk(q, v)?;

        let (previous_deformation, older_deformation) =
            self.history.aligned(pose.contact_feet);

        let levels = {
            let context = TaskContext {
                oracle: &self.oracle,
                q,
                v,
                pose,
                previous_deformation: &previous_deformation,
                older_deformation: &older_deformation,
            };
            self.tasks.stacked_levels(&context)
        };

        let solution = self.solver.solve(&levels)?;
        self.diagnostics = solution.diagnostics;
        debug!(
            residual = solution.equality_residuals.first().copied().unwrap_or(0.0),
            "cascade solved"
        );

        let nv = self.oracle.nv();
        let nc = pose.contact_feet.count();
        self.x_opt = solution.x;
        self.contact_forces_opt = self.x_opt.rows(nv, 3 * nc).into_owned();
        self.deformations_opt = self.x_opt.rows(nv + 3 * nc, 3 * nc).into_owned();

        let accelerations = self.x_opt.rows(0, nv);
        let mut torques =
            self.oracle.mass_matrix() * accelerations + self.oracle.bias();
        if nc > 0 {
            torques -= self.oracle.contact_jacobian().transpose() * &self.contact_forces_opt;
        }
        self.tau_opt = torques.rows(6, self.oracle.n_joints()).into_owned();

        self.history
            .advance(&self.deformations_opt, pose.contact_feet);

        Ok(())
    }

    /// The full optimization vector `[v̇; F_c; d_des]` of the last step.
    #[must_use]
    pub fn x_opt(&self) -> &DVector<f64> {
        &self.x_opt
    }

    /// Joint torques of the last step.
    #[must_use]
    pub fn torques(&self) -> &DVector<f64> {
        &self.tau_opt
    }

    /// World-frame contact forces, three per contact foot in contact order.
    #[must_use]
    pub fn contact_forces(&self) -> &DVector<f64> {
        &self.contact_forces_opt
    }

    /// Commanded terrain deformations, aligned with the contact forces.
    #[must_use]
    pub fn deformations(&self) -> &DVector<f64> {
        &self.deformations_opt
    }

    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        self.diagnostics
    }

    #[must_use]
    pub fn oracle(&self) -> &R {
        &self.oracle
    }

    #[must_use]
    pub fn tasks(&self) -> &PrioritizedTasks {
        &self.tasks
    }

    pub fn tasks_mut(&mut self) -> &mut PrioritizedTasks {
        &mut self.tasks
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use legged::{Foot, FootSet};
    use nalgebra::{UnitQuaternion, Vector3};
    use rbd::{BodyParams, SingleBodyModel};

    use crate::tasks::{ContactConstraintType, ControlTasks, TaskGains, TaskName};

    use super::*;

    const DT: f64 = 0.004;
    const HEIGHT: f64 = 0.5;

    fn controller(
        gains: TaskGains,
        contact: ContactConstraintType,
    ) -> WholeBodyController<SingleBodyModel> {
        let model = SingleBodyModel::new(BodyParams::default());
        let tasks = PrioritizedTasks::new(ControlTasks::new(gains, contact, DT).unwrap());
        WholeBodyController::new(model, tasks)
    }

    fn standing_state() -> (DVector<f64>, DVector<f64>) {
        let model = SingleBodyModel::new(BodyParams::default());
        (model.standing_q(HEIGHT), DVector::zeros(18))
    }

    fn standing_pose() -> GeneralizedPose {
        GeneralizedPose {
            base_pos: Vector3::new(0.0, 0.0, HEIGHT),
            base_quat: UnitQuaternion::identity(),
            contact_feet: FootSet::ALL,
            ..GeneralizedPose::default()
        }
    }

    fn swing_pose_for(contact: FootSet, model: &mut SingleBodyModel, q: &DVector<f64>) -> GeneralizedPose {
        let v = DVector::zeros(18);
        model.set_contact_feet(contact);
        model.compute_eom(q, &v).unwrap();

        let swing = contact.complement();
        let mut feet_pos = DVector::zeros(3 * swing.count());
        feet_pos.copy_from(model.swing_feet_positions());

        GeneralizedPose {
            base_pos: Vector3::new(0.0, 0.0, HEIGHT),
            contact_feet: contact,
            feet_pos,
            feet_vel: DVector::zeros(3 * swing.count()),
            feet_acc: DVector::zeros(3 * swing.count()),
            ..GeneralizedPose::default()
        }
    }

    #[test]
    fn standstill_solution_is_consistent() {
        let mut controller = controller(TaskGains::default(), ContactConstraintType::SoftKv);
        let (q, v) = standing_state();

        controller.step(&q, &v, &standing_pose()).unwrap();

        // dimension: nv + 6 nc
        assert_eq!(controller.x_opt().len(), 18 + 24);
        assert!(controller.x_opt().iter().all(|value| value.is_finite()));

        // Newton-Euler on the floating-base rows
        let accelerations = controller.x_opt().rows(0, 18).into_owned();
        let residual = (controller.oracle().mass_matrix() * accelerations
            + controller.oracle().bias()
            - controller.oracle().contact_jacobian().transpose()
                * controller.contact_forces())
        .rows(0, 6)
        .norm();
        assert!(residual < 1e-3, "residual {residual}");

        // the stance carries the weight
        let weight = 24.0 * 9.81;
        let total_normal: f64 = (0..4)
            .map(|leg| controller.contact_forces()[3 * leg + 2])
            .sum();
        assert_relative_eq!(total_normal, weight, epsilon = 0.05 * weight);

        let gains = TaskGains::default();
        for leg in 0..4 {
            let force = controller.contact_forces().rows(3 * leg, 3);
            let tangential = (force[0] * force[0] + force[1] * force[1]).sqrt();
            assert!(tangential <= gains.friction_coefficient * force[2] + 1e-6);
            assert!(force[2] >= gains.normal_force_min - 1e-6);
            assert!(force[2] <= gains.normal_force_max + 1e-6);
        }

        // torques stay within the actuation limits
        for torque in controller.torques().iter() {
            assert!(torque.abs() <= gains.tau_max + 1e-6);
        }
    }

    #[test]
    fn rigid_contact_mode_also_solves() {
        let mut controller = controller(TaskGains::default(), ContactConstraintType::Rigid);
        let (q, v) = standing_state();

        controller.step(&q, &v, &standing_pose()).unwrap();

        // rigid contact keeps the contact points still
        let accelerations = controller.x_opt().rows(0, 18).into_owned();
        let contact_acceleration = controller.oracle().contact_jacobian() * accelerations
            + controller.oracle().contact_jdot_v();
        assert!(contact_acceleration.norm() < 1e-3);
    }

    #[test]
    fn lifted_feet_populate_the_swing_rows_in_canonical_order() {
        let mut model = SingleBodyModel::new(BodyParams::default());
        let (q, v) = standing_state();
        let contact = FootSet::EMPTY.with(Foot::LeftFront).with(Foot::RightHind);
        let pose = swing_pose_for(contact, &mut model, &q);

        let tasks = PrioritizedTasks::new(
            ControlTasks::new(TaskGains::default(), ContactConstraintType::SoftKv, DT).unwrap(),
        );
        let (previous, older) = DeformationHistory::new().aligned(contact);
        let context = TaskContext {
            oracle: &model,
            q: &q,
            v: &v,
            pose: &pose,
            previous_deformation: &previous,
            older_deformation: &older,
        };
        let swing_task = tasks
            .tasks()
            .build(TaskName::SwingFeetMotionTracking, &context);

        // two swing feet: RF rows first, then LH, per the canonical order
        assert_eq!(swing_task.eq_matrix.nrows(), 6);
        let rf_columns = 6 + 3 * Foot::RightFront.index();
        let lh_columns = 6 + 3 * Foot::LeftHind.index();
        assert!(swing_task.eq_matrix.view((0, rf_columns), (3, 3)).norm() > 1e-9);
        assert!(swing_task.eq_matrix.view((3, lh_columns), (3, 3)).norm() > 1e-9);
        // and not the other way around
        assert_relative_eq!(
            swing_task.eq_matrix.view((0, lh_columns), (3, 3)).norm(),
            0.0
        );

        // the full cascade also runs with a partial contact set
        let mut controller = controller(TaskGains::default(), ContactConstraintType::SoftKv);
        controller.step(&q, &v, &pose).unwrap();
        assert_eq!(controller.x_opt().len(), 18 + 12);
        assert_eq!(controller.contact_forces().len(), 6);
    }

    #[test]
    fn no_contact_still_returns_a_finite_solution() {
        let mut model = SingleBodyModel::new(BodyParams::default());
        let (q, v) = standing_state();
        let pose = swing_pose_for(FootSet::EMPTY, &mut model, &q);

        let mut controller = controller(TaskGains::default(), ContactConstraintType::SoftKv);
        controller.step(&q, &v, &pose).unwrap();

        assert_eq!(controller.x_opt().len(), 18);
        assert!(controller.x_opt().iter().all(|value| value.is_finite()));
        assert_eq!(controller.contact_forces().len(), 0);
    }

    #[test]
    fn infeasible_torque_limit_falls_back_to_slack() {
        let gains = TaskGains {
            tau_max: 0.1,
            ..TaskGains::default()
        };
        let mut controller = controller(gains, ContactConstraintType::SoftKv);
        let (q, v) = standing_state();

        // no panic, no error: the slack absorbs the impossible bound
        controller.step(&q, &v, &standing_pose()).unwrap();
        assert!(controller.torques().iter().all(|torque| torque.is_finite()));
    }

    #[test]
    fn invalid_measurements_are_rejected() {
        let mut controller = controller(TaskGains::default(), ContactConstraintType::SoftKv);
        let (q, v) = standing_state();

        // wrong dimension
        assert!(controller.step(&DVector::zeros(5), &v, &standing_pose()).is_err());

        // non-unit quaternion
        let mut bad_quat = q.clone();
        bad_quat[6] = 2.0;
        assert!(controller.step(&bad_quat, &v, &standing_pose()).is_err());

        // inconsistent pose
        let mut bad_pose = standing_pose();
        bad_pose.contact_feet = FootSet::LEFT_DIAGONAL;
        assert!(controller.step(&q, &v, &bad_pose).is_err());
    }
}
