//! The real-time control loop.
//!
//! One thread owns the planner, the whole-body controller and the dynamics
//! oracle. Each tick is snapshot → planner → controller → publish, with
//! parameter updates drained from a command queue strictly between ticks.
//! Overruns skip the next deadline instead of catching up; repeated tick
//! failures latch the loop fatal and stop command publication.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender, channel},
    },
    time::{Duration, Instant},
};

use nalgebra::DVector;
use rbd::RigidBodyDynamics;
use tracing::{debug, error as log_error, warn};

use motion::{InterpolationMethod, TrotEngine};
use wbc::{ContactConstraintType, TaskGains, WholeBodyController};

use crate::{
    Error, Result,
    config::LoopConfig,
    snapshot::{SensorSample, SensorSlot},
};

/// Failed ticks bridged by replaying the last command before latching fatal.
pub const MAX_CONSECUTIVE_TICK_FAILURES: usize = 2;

/// Parameter updates applied between ticks, never during a step.
#[derive(Debug, Clone)]
pub enum Command {
    SetGains(Box<TaskGains>),
    SetContactConstraint(ContactConstraintType),
    SetStepDuration(f64),
    SetStepHeight(f64),
    SetStepHorizontalPhaseDelay(f64),
    SetFootPenetration(f64),
    SetInterpolationMethod(InterpolationMethod),
}

/// Handle for other threads to enqueue parameter updates.
#[derive(Debug, Clone)]
pub struct CommandSender(Sender<Command>);

impl CommandSender {
    /// Enqueues a command; false when the loop is gone.
    pub fn send(&self, command: Command) -> bool {
        self.0.send(command).is_ok()
    }
}

/// The per-tick output of the loop.
#[derive(Debug, Clone, PartialEq)]
pub struct TorqueCommand {
    pub torques: DVector<f64>,
    /// Solved contact forces, for logging collaborators.
    pub contact_forces: DVector<f64>,
    /// Solved terrain deformations, for logging collaborators.
    pub deformations: DVector<f64>,
    pub tick: u64,
}

pub struct ControlLoop<R> {
    engine: TrotEngine,
    controller: WholeBodyController<R>,
    sample_time: f64,
    max_staleness: f64,
    commands: Receiver<Command>,

    ticks: u64,
    published: u64,
    overruns: u64,
    consecutive_failures: usize,
    last_command: Option<TorqueCommand>,
    fatal: bool,
}

impl<R: RigidBodyDynamics> ControlLoop<R> {
    #[must_use]
    pub fn new(
        engine: TrotEngine,
        controller: WholeBodyController<R>,
        config: &LoopConfig,
    ) -> (Self, CommandSender) {
        let (sender, receiver) = channel();

        (
            Self {
                engine,
                controller,
                sample_time: config.sample_time,
                max_staleness: config.max_staleness_ticks as f64 * config.sample_time,
                commands: receiver,
                ticks: 0,
                published: 0,
                overruns: 0,
                consecutive_failures: 0,
                last_command: None,
                fatal: false,
            },
            CommandSender(sender),
        )
    }

    /// Runs one control tick on the given snapshot.
    ///
    /// `Ok(None)` while the warm-up captures the initial pose; an `Err` means
    /// the loop is latched fatal and publishes nothing anymore.
    pub fn tick(&mut self, sample: &SensorSample) -> Result<Option<TorqueCommand>> {
        if self.fatal {
            return Err(Error::Fatal);
        }

        self.apply_pending_commands();

        let now = self.ticks as f64 * self.sample_time;
        self.ticks += 1;

        match self.run_tick(now, sample) {
            Ok(command) => {
                self.consecutive_failures = 0;
                if let Some(command) = &command {
                    self.last_command = Some(command.clone());
                }
                Ok(command)
            }
            Err(error) => self.bridge_failure(error),
        }
    }

    fn run_tick(&mut self, now: f64, sample: &SensorSample) -> Result<Option<TorqueCommand>> {
        let age = now - sample.timestamp;
        if age > self.max_staleness {
            return Err(Error::SensorStale {
                age,
                max: self.max_staleness,
            });
        }

        let inputs = sample.planner_inputs()?;
        let Some(pose) = self.engine.update(now, &inputs)? else {
            return Ok(None);
        };

        let q = sample.generalized_coordinates();
        let v = sample.generalized_velocities();
        self.controller.step(&q, &v, &pose)?;

        self.published += 1;
        Ok(Some(TorqueCommand {
            torques: self.controller.torques().clone(),
            contact_forces: self.controller.contact_forces().clone(),
            deformations: self.controller.deformations().clone(),
            tick: self.ticks,
        }))
    }

    /// A failed tick replays the previous command; repeated failures latch
    /// the loop fatal.
    fn bridge_failure(&mut self, failure: Error) -> Result<Option<TorqueCommand>> {
        if failure.is_fatal() {
            self.fatal = true;
            log_error!(%failure, "control loop latched fatal");
            return Err(failure);
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures > MAX_CONSECUTIVE_TICK_FAILURES {
            self.fatal = true;
            let count = self.consecutive_failures;
            log_error!(count, "control loop latched fatal");
            return Err(Error::ConsecutiveFailures { count });
        }

        warn!(%failure, "tick failed, replaying the previous command");
        Ok(self.last_command.clone())
    }

    fn apply_pending_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            debug!(?command, "applying parameter update");
            let planner = self.engine.planner_mut();

            let outcome: Option<Error> = match command {
                Command::SetGains(gains) => self
                    .controller
                    .tasks_mut()
                    .tasks_mut()
                    .set_gains(*gains)
                    .err()
                    .map(Into::into),
                Command::SetContactConstraint(contact) => {
                    self.controller
                        .tasks_mut()
                        .tasks_mut()
                        .set_contact_constraint(contact);
                    None
                }
                Command::SetStepDuration(duration) => {
                    planner.set_step_duration(duration).err().map(Into::into)
                }
                Command::SetStepHeight(height) => {
                    planner.set_step_height(height).err().map(Into::into)
                }
                Command::SetStepHorizontalPhaseDelay(delay) => planner
                    .set_step_horizontal_phase_delay(delay)
                    .err()
                    .map(Into::into),
                Command::SetFootPenetration(penetration) => {
                    planner.set_foot_penetration(penetration).err().map(Into::into)
                }
                Command::SetInterpolationMethod(method) => {
                    planner.set_interpolation_method(method);
                    None
                }
            };

            // a rejected update keeps the previous value
            if let Some(rejection) = outcome {
                warn!(error = %rejection, "parameter update rejected");
            }
        }
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn published(&self) -> u64 {
        self.published
    }

    #[must_use]
    pub fn overruns(&self) -> u64 {
        self.overruns
    }

    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    #[must_use]
    pub fn controller(&self) -> &WholeBodyController<R> {
        &self.controller
    }

    #[must_use]
    pub fn engine(&self) -> &TrotEngine {
        &self.engine
    }

    /// Drives ticks at the configured period until `shutdown` is set.
    ///
    /// An in-progress tick is never interrupted; the flag is checked at tick
    /// boundaries. A tick that overruns its deadline skips the next one.
    pub fn run(
        &mut self,
        slot: &SensorSlot<SensorSample>,
        shutdown: &AtomicBool,
        mut publish: impl FnMut(&TorqueCommand),
    ) -> Result<()> {
        let period = Duration::from_secs_f64(self.sample_time);
        let mut deadline = Instant::now() + period;

        while !shutdown.load(Ordering::Relaxed) {
            let sample = slot.read();
            match self.tick(&sample) {
                Ok(Some(command)) => publish(&command),
                Ok(None) => {}
                Err(failure) => return Err(failure),
            }

            let now = Instant::now();
            if now > deadline {
                self.overruns += 1;
                warn!(overruns = self.overruns, "tick overran, skipping the next deadline");
                deadline += period * 2;
            } else {
                std::thread::sleep(deadline - now);
                deadline += period;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use rbd::{BodyParams, RigidBodyDynamics, SingleBodyModel};
    use wbc::PrioritizedTasks;

    use crate::config::SleipnirConfig;

    use super::*;

    fn quick_config() -> SleipnirConfig {
        let mut config = SleipnirConfig::default();
        config.control_loop.zero_time = 0.02;
        config.control_loop.init_time = 0.04;
        config.control_loop.max_staleness_ticks = 4;
        config
    }

    fn control_loop(config: &SleipnirConfig) -> (ControlLoop<SingleBodyModel>, CommandSender) {
        let engine = config.trot_engine().unwrap();
        let controller = WholeBodyController::new(
            SingleBodyModel::new(BodyParams::default()),
            PrioritizedTasks::new(config.control_tasks().unwrap()),
        );
        ControlLoop::new(engine, controller, &config.control_loop)
    }

    fn standing_sample(timestamp: f64) -> SensorSample {
        let mut model = SingleBodyModel::new(BodyParams::default());
        let q = model.standing_q(0.5);
        let v = nalgebra::DVector::zeros(18);
        model.compute_eom(&q, &v).unwrap();

        let mut sample = SensorSample::default();
        sample.q.copy_from_slice(q.as_slice());
        sample.body_acceleration = [0.0, 0.0, 9.81];
        for (slot, position) in sample.feet_positions.iter_mut().zip(model.feet_positions()) {
            slot.copy_from_slice(position.as_slice());
        }
        sample.timestamp = timestamp;
        sample
    }

    #[test]
    fn warm_up_publishes_nothing_then_torques_flow() {
        let config = quick_config();
        let (mut control_loop, _commands) = control_loop(&config);

        let dt = config.control_loop.sample_time;
        let mut outputs = Vec::new();
        for tick in 0..40 {
            let sample = standing_sample(tick as f64 * dt);
            outputs.push(control_loop.tick(&sample).unwrap());
        }

        // capture window: nothing published
        assert!(outputs[..5].iter().all(Option::is_none));
        // trot is reached and torque commands flow
        let last = outputs.last().unwrap().as_ref().unwrap();
        assert_eq!(last.torques.len(), 12);
        assert!(last.torques.iter().all(|torque| torque.is_finite()));
        assert!(control_loop.published() > 0);
    }

    #[test]
    fn stale_snapshots_bridge_then_latch_fatal() {
        let config = quick_config();
        let (mut control_loop, _commands) = control_loop(&config);
        let dt = config.control_loop.sample_time;

        // run into the trot so a command exists to replay
        for tick in 0..40 {
            control_loop.tick(&standing_sample(tick as f64 * dt)).unwrap();
        }

        // a snapshot far in the past is stale for every following tick
        let stale = standing_sample(0.0);
        let bridged = control_loop.tick(&stale).unwrap();
        assert!(bridged.is_some());
        control_loop.tick(&stale).unwrap();

        assert!(matches!(
            control_loop.tick(&stale),
            Err(Error::ConsecutiveFailures { .. })
        ));
        assert!(control_loop.is_fatal());
        assert!(matches!(
            control_loop.tick(&standing_sample(1.0)),
            Err(Error::Fatal)
        ));
    }

    #[test]
    fn commands_apply_between_ticks_and_rejections_keep_the_old_value() {
        let config = quick_config();
        let (mut control_loop, commands) = control_loop(&config);

        assert!(commands.send(Command::SetStepDuration(0.4)));
        control_loop.tick(&standing_sample(0.0)).unwrap();
        assert_eq!(control_loop.engine().planner().step_duration(), 0.4);

        assert!(commands.send(Command::SetStepDuration(-1.0)));
        control_loop.tick(&standing_sample(0.004)).unwrap();
        assert_eq!(control_loop.engine().planner().step_duration(), 0.4);

        assert!(commands.send(Command::SetContactConstraint(ContactConstraintType::Rigid)));
        control_loop.tick(&standing_sample(0.008)).unwrap();
        assert_eq!(
            control_loop
                .controller()
                .tasks()
                .tasks()
                .contact_constraint(),
            ContactConstraintType::Rigid
        );
    }

    #[test]
    fn run_honors_the_shutdown_flag() {
        let config = quick_config();
        let (mut control_loop, _commands) = control_loop(&config);

        let slot = SensorSlot::new(standing_sample(0.0));
        let shutdown = AtomicBool::new(true);

        control_loop
            .run(&slot, &shutdown, |_command| {})
            .unwrap();
        assert_eq!(control_loop.ticks(), 0);
    }
}
