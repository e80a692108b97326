//! # wbc
//!
//! The prioritized whole-body controller: eight elementary control tasks
//! over the optimization vector `x = [v̇; F_c; d_des]`, grouped into
//! priority levels and solved as a lexicographic cascade. The result is
//! sliced into joint torques, contact forces and terrain deformations.

use thiserror::Error;

pub mod controller;
pub mod history;
pub mod prioritized;
pub mod tasks;

pub use controller::WholeBodyController;
pub use history::DeformationHistory;
pub use prioritized::PrioritizedTasks;
pub use tasks::{ContactConstraintType, ControlTasks, TaskContext, TaskGains, TaskName};

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Pose(#[from] legged::Error),
    #[error(transparent)]
    Oracle(#[from] rbd::Error),
    #[error(transparent)]
    Solver(#[from] hopt::Error),
    #[error("tau_max must be positive, got {0}")]
    TauMax(f64),
    #[error("mu must be in (0, 1], got {0}")]
    FrictionCoefficient(f64),
    #[error("Fn_min must be non-negative, got {0}")]
    NormalForceMin(f64),
    #[error("Fn_max must be at least Fn_min, got {0}")]
    NormalForceMax(f64),
    #[error("{name} gains must be finite and non-negative")]
    Gains { name: &'static str },
    #[error("sample_time must be positive, got {0}")]
    SampleTime(f64),
    #[error("task {name} appears {count} times in the priority list")]
    PriorityList { name: tasks::TaskName, count: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
