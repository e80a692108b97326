//! Result and Error types for the crate.

use miette::Diagnostic;
use thiserror::Error;

/// Result containing an error variant from this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong in the control loop.
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    /// The motion planner or its warm-up state machine rejected a tick.
    #[error(transparent)]
    Planner(#[from] motion::Error),

    /// The whole-body controller rejected a tick.
    #[error(transparent)]
    Controller(#[from] wbc::Error),

    /// The acceleration filter rejected its configuration.
    #[error(transparent)]
    Filter(#[from] filter::Error),

    /// A sensor sample failed validation before reaching the planner.
    #[error(transparent)]
    Sensors(#[from] legged::Error),

    /// Configuration loading or validation failed.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] crate::config::Error),

    /// The snapshot is older than the configured staleness limit.
    #[error("sensor snapshot is {age:.3} s old, allowed {max:.3} s")]
    SensorStale { age: f64, max: f64 },

    /// Too many failed ticks in a row; the loop latches fatal.
    #[error("{count} consecutive failed control ticks")]
    ConsecutiveFailures { count: usize },

    /// The loop already latched a fatal error and publishes nothing.
    #[error("control loop is latched fatal")]
    Fatal,
}

impl Error {
    /// Whether this error latches the loop.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::Fatal
                | Error::ConsecutiveFailures { .. }
                | Error::Planner(motion::Error::ConsecutiveFailures { .. })
        )
    }
}
