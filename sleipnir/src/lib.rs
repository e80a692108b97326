//! # sleipnir
//!
//! Real-time locomotion control for a quadruped: a LIP trot planner feeding
//! a prioritized whole-body controller, wrapped in a fixed-period control
//! loop with snapshot-consistent sensor intake and between-tick parameter
//! updates.
//!
//! The heavy lifting lives in the workspace crates: [`motion`] plans,
//! [`wbc`] tracks, [`hopt`] solves, [`rbd`] abstracts the dynamics library.
//! This crate wires them together, loads and validates configuration, and
//! owns the error policy of the loop.

pub mod config;
pub mod control_loop;
pub mod error;
pub mod snapshot;

pub use config::{Config, SleipnirConfig};
pub use control_loop::{Command, CommandSender, ControlLoop, TorqueCommand};
pub use error::{Error, Result};
pub use snapshot::{SensorSample, SensorSlot};
