//! # legged
//!
//! Shared types for quadruped locomotion: foot identities, contact sets, the
//! planner→controller [`GeneralizedPose`] contract, and the terrain plane
//! estimate.

use thiserror::Error;

pub mod foot;
pub mod plane;
pub mod pose;
pub mod quat;

pub use foot::{Foot, FootSet};
pub use plane::TerrainPlane;
pub use pose::GeneralizedPose;

/// Unit-norm tolerance for quaternions arriving from sensors.
pub const QUAT_NORM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Quaternion norm {norm} is not unit within tolerance")]
    NonUnitQuaternion { norm: f64 },
    #[error("{what} has dimension {actual}, expected {expected}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{what} contains a non-finite value")]
    NonFinite { what: &'static str },
}

pub type Result<T> = std::result::Result<T, Error>;
