//! # rbd
//!
//! The rigid-body dynamics oracle the whole-body controller is written
//! against. A real deployment backs this with a full dynamics library fed
//! from the robot URDF; [`SingleBodyModel`] is an analytic stand-in that is
//! exact for a quadruped with massless legs, and good enough for controller
//! tests and demos.

use legged::FootSet;
use nalgebra::{DMatrix, DVector, Rotation3};
use thiserror::Error;

pub mod single_body;

pub use single_body::{BodyParams, SingleBodyModel};

#[derive(Debug, Error)]
pub enum Error {
    #[error("Generalized coordinates have dimension {actual}, expected {expected}")]
    CoordinateDimension { expected: usize, actual: usize },
    #[error("Generalized velocities have dimension {actual}, expected {expected}")]
    VelocityDimension { expected: usize, actual: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Rigid-body dynamics quantities for a floating-base quadruped.
///
/// The accessors are only meaningful after the corresponding compute call:
/// [`compute_eom`](RigidBodyDynamics::compute_eom) refreshes kinematics, the
/// mass matrix, the bias vector and all Jacobians;
/// [`compute_second_order_fk`](RigidBodyDynamics::compute_second_order_fk)
/// additionally refreshes the `J̇·v` products.
///
/// Conventions: base linear and angular velocity are expressed in the world
/// frame; contact and swing Jacobian rows are stacked three per foot in the
/// canonical order of the respective foot set.
pub trait RigidBodyDynamics {
    /// Number of actuated joints.
    fn n_joints(&self) -> usize;

    /// Dimension of the generalized velocity vector.
    fn nv(&self) -> usize {
        6 + self.n_joints()
    }

    /// Dimension of the generalized coordinate vector.
    fn nq(&self) -> usize {
        7 + self.n_joints()
    }

    /// Selects which feet are in contact; the remaining feet are in swing.
    ///
    /// Reorders the rows of the contact and swing Jacobians accordingly.
    fn set_contact_feet(&mut self, contact: FootSet);

    fn contact_feet(&self) -> FootSet;

    /// Update kinematics and compute M, h and the Jacobians.
    fn compute_eom(&mut self, q: &DVector<f64>, v: &DVector<f64>) -> Result<()>;

    /// Update accelerations so the `J̇·v` products are available.
    fn compute_second_order_fk(&mut self, q: &DVector<f64>, v: &DVector<f64>) -> Result<()>;

    /// Mass matrix, `nv × nv`.
    fn mass_matrix(&self) -> &DMatrix<f64>;

    /// Nonlinear bias (Coriolis, centrifugal and gravity), `nv`.
    fn bias(&self) -> &DVector<f64>;

    /// Stacked contact-feet Jacobian, `3·nc × nv`.
    fn contact_jacobian(&self) -> &DMatrix<f64>;

    /// Base Jacobian (linear rows first), `6 × nv`.
    fn base_jacobian(&self) -> &DMatrix<f64>;

    /// Stacked swing-feet Jacobian, `3·ns × nv`.
    fn swing_jacobian(&self) -> &DMatrix<f64>;

    /// `J̇_c · v`, `3·nc`.
    fn contact_jdot_v(&self) -> &DVector<f64>;

    /// `J̇_b · v`, `6`.
    fn base_jdot_v(&self) -> &DVector<f64>;

    /// `J̇_s · v`, `3·ns`.
    fn swing_jdot_v(&self) -> &DVector<f64>;

    /// Rotation from body to world frame.
    fn base_rotation(&self) -> Rotation3<f64>;

    /// World positions of the swing feet, `3·ns`.
    fn swing_feet_positions(&self) -> &DVector<f64>;
}
