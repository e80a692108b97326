//! TOML configuration with overlays and range validation.
//!
//! A config type declares its file path and is loaded either directly or
//! with a robot-specific overlay merged over the shared defaults. Overlay
//! keys that do not exist in the main file, or change a value's type, are
//! configuration mistakes and rejected outright. Range validation happens
//! when the values are applied to the components, through their setters.

use std::{any::type_name, fs::read_to_string, path::Path};

use miette::Diagnostic;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use toml::{Table, Value};

use filter::IirFilter;
use motion::{InterpolationMethod, MotionPlanner, TrotEngine};
use wbc::{ContactConstraintType, ControlTasks, TaskGains};

/// Error kinds that can occur while loading a config
#[derive(Debug, Error, Diagnostic)]
pub enum ErrorKind {
    #[error("Found key `{key}` in overlay that does not exist in the main config")]
    ExtraKey { key: String, value: Value },
    #[error("Type of `{key}` differs between main config and overlay")]
    TypeMismatch {
        key: String,
        main_value: Value,
        overlay_value: Value,
    },
    #[error("Failed to read config from `{path}`")]
    ReadIo {
        path: String,
        source: std::io::Error,
    },
    #[error("Failed to deserialize toml")]
    Deserialize(#[from] toml::de::Error),
    #[error("Invalid subtable `{key}` in overlay")]
    Subtable { key: String, source: Box<ErrorKind> },
}

/// Error type for a named config
#[derive(Debug, Error, Diagnostic)]
#[error("Config `{name}` failed")]
pub struct Error {
    pub name: String,
    #[source]
    pub kind: ErrorKind,
}

impl Error {
    fn from_kind<T: Config>(kind: ErrorKind) -> Self {
        Self {
            name: type_name::<T>().to_string(),
            kind,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Trait that defines a configuration file for the implementor
pub trait Config: DeserializeOwned + Serialize {
    /// The relative path from which the configuration should be loaded
    const PATH: &'static str;

    /// Loads the configuration from below `root`
    fn load(root: impl AsRef<Path>) -> Result<Self> {
        let main = load_table::<Self>(root)?;

        main.try_into()
            .map_err(|e| Error::from_kind::<Self>(ErrorKind::Deserialize(e)))
    }

    /// Loads the configuration and overlays robot-specific values over it
    fn load_with_overlay(
        main_root: impl AsRef<Path>,
        overlay_root: impl AsRef<Path>,
    ) -> Result<Self> {
        let mut main = load_table::<Self>(main_root)?;
        let mut overlay = load_table::<Self>(overlay_root)?;

        merge_tables::<Self>(&mut main, &mut overlay)?;

        main.try_into()
            .map_err(|e| Error::from_kind::<Self>(ErrorKind::Deserialize(e)))
    }
}

/// Overlay values from the overlay into the main table.
fn merge_tables<T: Config>(
    main: &mut Table,
    overlay: &mut Table,
) -> Result<()> {
    // keys that only exist in the overlay are typos until proven otherwise
    for (key, value) in overlay.iter() {
        if !main.contains_key(key) {
            return Err(Error::from_kind::<T>(ErrorKind::ExtraKey {
                key: key.to_string(),
                value: value.clone(),
            }));
        }
    }

    for (key, value) in main.iter_mut() {
        let Some(overlay_value) = overlay.get_mut(key) else {
            continue;
        };

        if std::mem::discriminant(value) != std::mem::discriminant(overlay_value) {
            return Err(Error::from_kind::<T>(ErrorKind::TypeMismatch {
                key: key.to_string(),
                main_value: value.clone(),
                overlay_value: overlay_value.clone(),
            }));
        }

        if let (Some(main_table), Some(overlay_table)) =
            (value.as_table_mut(), overlay_value.as_table_mut())
        {
            merge_tables::<T>(main_table, overlay_table).map_err(|e| {
                Error::from_kind::<T>(ErrorKind::Subtable {
                    key: key.clone(),
                    source: Box::new(e.kind),
                })
            })?;
        } else {
            std::mem::swap(value, overlay_value);
        }
    }

    Ok(())
}

fn load_table<T: Config>(root: impl AsRef<Path>) -> Result<Table> {
    let full_path = root.as_ref().join(T::PATH);

    read_to_string(&full_path)
        .map_err(|e| {
            Error::from_kind::<T>(ErrorKind::ReadIo {
                path: full_path.display().to_string(),
                source: e,
            })
        })?
        .parse()
        .map_err(|e| Error::from_kind::<T>(ErrorKind::Deserialize(e)))
}

/// Timing of the control loop and the warm-up phases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Control period Δt in seconds.
    pub sample_time: f64,
    /// Initial capture window before anything is published.
    pub zero_time: f64,
    /// Duration of the ramp to the trot-ready pose.
    pub init_time: f64,
    /// Snapshots older than this many ticks are stale.
    pub max_staleness_ticks: u64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            sample_time: 0.004,
            zero_time: 1.0,
            init_time: 2.0,
            max_staleness_ticks: 8,
        }
    }
}

/// Step generation parameters of the LIP planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    pub step_duration: f64,
    pub step_height: f64,
    pub step_horizontal_phase_delay: f64,
    pub foot_penetration: f64,
    pub com_height: f64,
    pub interpolation_method: InterpolationMethod,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            step_duration: 0.5,
            step_height: 0.1,
            step_horizontal_phase_delay: 0.0,
            foot_penetration: 0.0,
            com_height: 0.5,
            interpolation_method: InterpolationMethod::Spline5,
        }
    }
}

/// Acceleration filter parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub acc_filter_order: usize,
    pub acc_filter_beta: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            acc_filter_order: 2,
            acc_filter_beta: 0.2,
        }
    }
}

/// Whole-body controller parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WbcConfig {
    pub contact_constraint_type: ContactConstraintType,
    pub gains: TaskGains,
}

/// The full configuration of the stack.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SleipnirConfig {
    pub control_loop: LoopConfig,
    pub planner: PlannerConfig,
    pub filter: FilterConfig,
    pub wbc: WbcConfig,
}

impl Config for SleipnirConfig {
    const PATH: &'static str = "config/sleipnir.toml";
}

impl SleipnirConfig {
    /// Builds the planner, applying every parameter through its validated
    /// setter.
    pub fn motion_planner(&self) -> crate::Result<MotionPlanner> {
        let mut planner = MotionPlanner::new();
        planner.set_sample_time(self.control_loop.sample_time)?;
        planner.set_step_duration(self.planner.step_duration)?;
        planner.set_step_height(self.planner.step_height)?;
        planner.set_step_horizontal_phase_delay(self.planner.step_horizontal_phase_delay)?;
        planner.set_foot_penetration(self.planner.foot_penetration)?;
        planner.set_com_height(self.planner.com_height)?;
        planner.set_interpolation_method(self.planner.interpolation_method);
        Ok(planner)
    }

    /// Builds the warm-up engine around the planner.
    pub fn trot_engine(&self) -> crate::Result<TrotEngine> {
        let acceleration_filter =
            IirFilter::new(self.filter.acc_filter_order, self.filter.acc_filter_beta)?;
        let engine = TrotEngine::new(
            self.motion_planner()?,
            acceleration_filter,
            self.control_loop.zero_time,
            self.control_loop.init_time,
        )?;
        Ok(engine)
    }

    /// Builds the control-task set for the whole-body controller.
    pub fn control_tasks(&self) -> crate::Result<ControlTasks> {
        let tasks = ControlTasks::new(
            self.wbc.gains.clone(),
            self.wbc.contact_constraint_type,
            self.control_loop.sample_time,
        )?;
        Ok(tasks)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    #[test]
    fn defaults_build_every_component() {
        let config = SleipnirConfig::default();
        config.motion_planner().unwrap();
        config.trot_engine().unwrap();
        config.control_tasks().unwrap();
    }

    #[test]
    fn out_of_range_values_are_rejected_on_apply() {
        let mut config = SleipnirConfig::default();
        config.planner.step_duration = -0.5;
        assert!(config.motion_planner().is_err());

        let mut config = SleipnirConfig::default();
        config.filter.acc_filter_beta = 2.0;
        assert!(config.trot_engine().is_err());

        let mut config = SleipnirConfig::default();
        config.wbc.gains.friction_coefficient = 1.5;
        assert!(config.control_tasks().is_err());
    }

    #[test]
    fn round_trips_through_toml() {
        let config = SleipnirConfig::default();
        let serialized = toml::to_string_pretty(&config).unwrap();
        let parsed: SleipnirConfig = toml::from_str(&serialized).unwrap();

        assert_eq!(parsed.control_loop.sample_time, config.control_loop.sample_time);
        assert_eq!(
            parsed.wbc.contact_constraint_type,
            config.wbc.contact_constraint_type
        );
    }

    #[test]
    fn invalid_contact_constraint_type_fails_to_parse() {
        let mut table: Table = toml::to_string(&SleipnirConfig::default())
            .unwrap()
            .parse()
            .unwrap();
        table["wbc"]["contact_constraint_type"] = Value::String("bouncy".into());

        let result: std::result::Result<SleipnirConfig, _> = table.try_into();
        assert!(result.is_err());
    }

    #[test]
    fn overlay_merges_and_catches_mistakes() {
        let dir = tempfile::tempdir().unwrap();
        let main_root = dir.path().join("main");
        let overlay_root = dir.path().join("robot");
        fs::create_dir_all(main_root.join("config")).unwrap();
        fs::create_dir_all(overlay_root.join("config")).unwrap();

        let main = toml::to_string_pretty(&SleipnirConfig::default()).unwrap();
        fs::write(main_root.join(SleipnirConfig::PATH), main).unwrap();
        fs::write(
            overlay_root.join(SleipnirConfig::PATH),
            "[planner]\nstep_height = 0.07\n",
        )
        .unwrap();

        let config = SleipnirConfig::load_with_overlay(&main_root, &overlay_root).unwrap();
        assert_eq!(config.planner.step_height, 0.07);
        // untouched values come from the main config
        assert_eq!(config.planner.step_duration, 0.5);

        // a typo in the overlay is an error, not a silent no-op
        fs::write(
            overlay_root.join(SleipnirConfig::PATH),
            "[planner]\nstep_hieght = 0.07\n",
        )
        .unwrap();
        let error = SleipnirConfig::load_with_overlay(&main_root, &overlay_root).unwrap_err();
        assert!(matches!(error.kind, ErrorKind::Subtable { .. }));
    }
}
