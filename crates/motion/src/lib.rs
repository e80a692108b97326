//! # motion
//!
//! The trot motion planner: a discrete-time LIP step generator with swing
//! trajectory synthesis, plus the warm-up state machine that brings the
//! robot from its boot pose into the trot.

use thiserror::Error;

pub mod engine;
pub mod gait;
pub mod interpolation;
pub mod planner;

pub use engine::{PlannerInputs, TrotEngine};
pub use interpolation::InterpolationMethod;
pub use planner::MotionPlanner;

#[derive(Debug, Error)]
pub enum Error {
    #[error("sample_time must be positive, got {0}")]
    SampleTime(f64),
    #[error("step_duration must be positive, got {0}")]
    StepDuration(f64),
    #[error("step_height must be non-negative, got {0}")]
    StepHeight(f64),
    #[error("step_horizontal_phase_delay must be in [0, 1), got {0}")]
    PhaseDelay(f64),
    #[error("com_height must be positive, got {0}")]
    ComHeight(f64),
    #[error("zero_time must be non-negative, got {0}")]
    ZeroTime(f64),
    #[error("init_time must be positive, got {0}")]
    InitTime(f64),
    #[error("{what} is not finite")]
    NonFinite { what: &'static str },
    #[error("planner used before update_initial_conditions")]
    NotInitialized,
    #[error("{count} consecutive planner failures")]
    ConsecutiveFailures { count: usize },
    #[error("acceleration filter rejected the sample")]
    Filter(#[source] filter::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
