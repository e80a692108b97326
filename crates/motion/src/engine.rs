//! Warm-up and trot state machine around the [`MotionPlanner`].
//!
//! Mirrors the start-up sequence of the deployed controller: capture the
//! initial pose while the state estimator settles, ramp the base to the
//! trot-ready pose on a quintic, then hand over to the LIP loop.

use filter::IirFilter;
use legged::{GeneralizedPose, TerrainPlane, quat};
use nalgebra::{UnitQuaternion, Vector2, Vector3};
use tracing::warn;

use crate::{
    Error, Result,
    interpolation::{InterpolationMethod, spline},
    planner::MotionPlanner,
};

const GRAVITY: f64 = 9.81;

/// Everything the engine consumes each tick, already in SI units.
#[derive(Debug, Clone)]
pub struct PlannerInputs {
    pub base_position: Vector3<f64>,
    pub base_quat: UnitQuaternion<f64>,
    pub base_velocity: Vector3<f64>,
    /// Measured base linear acceleration in the body frame.
    pub body_acceleration: Vector3<f64>,
    /// Forward and lateral velocity command in the heading frame.
    pub velocity_command: Vector2<f64>,
    pub yaw_rate_command: f64,
    pub plane: TerrainPlane,
    pub feet_positions: [Vector3<f64>; 4],
    pub feet_velocities: [Vector3<f64>; 4],
}

#[derive(Clone, Copy)]
enum State {
    /// Before `zero_time`: keep capturing the initial pose, publish nothing.
    Capture {
        base_position: Vector3<f64>,
    },
    /// Quintic ramp from the captured pose to the trot-ready pose.
    RampUp {
        start_position: Vector3<f64>,
    },
    Trot,
}

pub struct TrotEngine {
    planner: MotionPlanner,
    acceleration_filter: IirFilter,
    zero_time: f64,
    init_time: f64,
    state: State,
    captured: bool,
    last_pose: Option<GeneralizedPose>,
    consecutive_failures: usize,
}

impl TrotEngine {
    /// At most this many consecutive planner failures are bridged by
    /// replaying the previous pose.
    pub const MAX_CONSECUTIVE_FAILURES: usize = 1;

    pub fn new(
        planner: MotionPlanner,
        acceleration_filter: IirFilter,
        zero_time: f64,
        init_time: f64,
    ) -> Result<Self> {
        if !zero_time.is_finite() || zero_time < 0.0 {
            return Err(Error::ZeroTime(zero_time));
        }
        if !init_time.is_finite() || init_time <= 0.0 {
            return Err(Error::InitTime(init_time));
        }

        Ok(Self {
            planner,
            acceleration_filter,
            zero_time,
            init_time,
            state: State::Capture {
                base_position: Vector3::zeros(),
            },
            captured: false,
            last_pose: None,
            consecutive_failures: 0,
        })
    }

    #[must_use]
    pub fn planner(&self) -> &MotionPlanner {
        &self.planner
    }

    pub fn planner_mut(&mut self) -> &mut MotionPlanner {
        &mut self.planner
    }

    /// Runs one tick at time `t`; `None` while the initial pose is captured.
    pub fn update(&mut self, t: f64, inputs: &PlannerInputs) -> Result<Option<GeneralizedPose>> {
        // the initial conditions are captured at least once, even when the
        // capture window is zero
        if t < self.zero_time || !self.captured {
            self.capture(inputs);
            if t < self.zero_time {
                return Ok(None);
            }
        }

        if let State::Capture { base_position, .. } = self.state {
            self.state = State::RampUp {
                start_position: base_position,
            };
        }

        if let State::RampUp { start_position } = self.state {
            if t < self.zero_time + self.init_time {
                let pose = self.ramp_pose(t, start_position, inputs);
                self.last_pose = Some(pose.clone());
                return Ok(Some(pose));
            }
            self.state = State::Trot;
        }

        self.trot(inputs)
    }

    fn capture(&mut self, inputs: &PlannerInputs) {
        let yaw = quat::yaw(&inputs.base_quat);

        self.planner.update_initial_conditions(
            &inputs.base_position,
            yaw,
            &inputs.feet_positions,
        );
        self.state = State::Capture {
            base_position: inputs.base_position,
        };
        self.captured = true;
    }

    /// Interpolated base pose between the captured and the trot-ready state.
    ///
    /// Feet stay where they are and every foot is in contact, so the swing
    /// blocks are empty.
    fn ramp_pose(
        &mut self,
        t: f64,
        start_position: Vector3<f64>,
        inputs: &PlannerInputs,
    ) -> GeneralizedPose {
        let plane = &inputs.plane;
        let roll = plane.roll();
        let pitch = plane.pitch();
        let yaw = self.planner.yaw_reference();
        let com_height = self.planner.com_height();

        let mut end_position = start_position;
        end_position.x += com_height * pitch.sin();
        end_position.y -= com_height * roll.sin();
        end_position.z = com_height * roll.cos() * pitch.cos()
            + plane.height_at(end_position.x, end_position.y);

        let progress = (t - self.zero_time) / self.init_time;
        let (position, velocity, acceleration) = spline(
            &start_position,
            &end_position,
            progress,
            InterpolationMethod::Spline5,
        );

        GeneralizedPose {
            base_pos: position,
            base_vel: velocity / self.init_time,
            base_acc: acceleration / (self.init_time * self.init_time),
            base_quat: UnitQuaternion::from_euler_angles(roll, pitch, yaw),
            base_angvel: Vector3::zeros(),
            ..GeneralizedPose::default()
        }
    }

    fn trot(&mut self, inputs: &PlannerInputs) -> Result<Option<GeneralizedPose>> {
        let feed_forward = match self.acceleration_feed_forward(inputs) {
            Ok(feed_forward) => feed_forward,
            Err(error) => return self.bridge_failure(error),
        };

        let result = self.planner.update(
            &inputs.base_position,
            &inputs.base_velocity,
            &feed_forward,
            &inputs.velocity_command,
            inputs.yaw_rate_command,
            &inputs.plane,
            &inputs.feet_positions,
            &inputs.feet_velocities,
        );

        match result {
            Ok(pose) => {
                self.consecutive_failures = 0;
                self.last_pose = Some(pose.clone());
                Ok(Some(pose))
            }
            Err(error) => self.bridge_failure(error),
        }
    }

    /// ZMP compensation: gravity expressed in the body frame joins the
    /// measured acceleration, and the filtered sum is fed back negated.
    fn acceleration_feed_forward(&mut self, inputs: &PlannerInputs) -> Result<Vector3<f64>> {
        let gravity_world = Vector3::new(0.0, 0.0, -GRAVITY);
        let gravity_body = inputs.base_quat.inverse_transform_vector(&gravity_world);
        let sum = inputs.body_acceleration + gravity_body;
        let filtered = self
            .acceleration_filter
            .filter(sum, self.planner.sample_time())
            .map_err(Error::Filter)?;
        Ok(-filtered)
    }

    /// One failed tick replays the previous pose; a second in a row is fatal.
    fn bridge_failure(&mut self, error: Error) -> Result<Option<GeneralizedPose>> {
        self.consecutive_failures += 1;

        if self.consecutive_failures > Self::MAX_CONSECUTIVE_FAILURES {
            return Err(Error::ConsecutiveFailures {
                count: self.consecutive_failures,
            });
        }

        match &self.last_pose {
            Some(pose) => {
                warn!(%error, "planner tick failed, replaying the previous pose");
                Ok(Some(pose.clone()))
            }
            None => Err(error),
        }
    }
}
