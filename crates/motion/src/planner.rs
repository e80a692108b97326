//! The LIP step generator.
//!
//! The base is reduced to a linear inverted pendulum of height `z_c`. At the
//! start of every step the divergent component of motion is propagated to the
//! step end and the next stance footprint is placed so the steady-state DCM
//! offset realises the commanded velocity. In between, the desired CoM
//! follows the pendulum dynamics about the current stance centroid.

use legged::{Foot, GeneralizedPose, TerrainPlane};
use nalgebra::{DVector, Rotation2, UnitQuaternion, Vector2, Vector3};
use tracing::debug;

use crate::{
    Error, Result,
    gait::{StepClock, TrotGait},
    interpolation::InterpolationMethod,
};

const GRAVITY: f64 = 9.81;

/// One planned swing arc from lift-off to touchdown.
#[derive(Debug, Clone, Copy)]
struct SwingArc {
    start: Vector3<f64>,
    target: Vector3<f64>,
}

/// Desired position, velocity and acceleration of one swing foot.
type SwingSample = (Vector3<f64>, Vector3<f64>, Vector3<f64>);

pub struct MotionPlanner {
    sample_time: f64,
    step_duration: f64,
    step_height: f64,
    horizontal_phase_delay: f64,
    foot_penetration: f64,
    com_height: f64,
    interpolation: InterpolationMethod,

    clock: StepClock,
    gait: TrotGait,
    yaw: f64,
    com_position: Vector2<f64>,
    com_velocity: Vector2<f64>,
    /// Current stance anchors and committed touchdown targets, per foot.
    footholds: [Vector3<f64>; 4],
    /// Hip footprint offsets in the heading frame, captured at start-up.
    nominal_offsets: [Vector2<f64>; 4],
    arcs: [Option<SwingArc>; 4],
    initialized: bool,
    planned: bool,
}

impl Default for MotionPlanner {
    fn default() -> Self {
        Self {
            sample_time: 0.004,
            step_duration: 0.5,
            step_height: 0.1,
            horizontal_phase_delay: 0.0,
            foot_penetration: 0.0,
            com_height: 0.5,
            interpolation: InterpolationMethod::default(),
            clock: StepClock::default(),
            gait: TrotGait::default(),
            yaw: 0.0,
            com_position: Vector2::zeros(),
            com_velocity: Vector2::zeros(),
            footholds: [Vector3::zeros(); 4],
            nominal_offsets: [Vector2::zeros(); 4],
            arcs: [None; 4],
            initialized: false,
            planned: false,
        }
    }
}

impl MotionPlanner {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sample_time(&mut self, sample_time: f64) -> Result<()> {
        if !sample_time.is_finite() || sample_time <= 0.0 {
            return Err(Error::SampleTime(sample_time));
        }
        self.sample_time = sample_time;
        Ok(())
    }

    pub fn set_step_duration(&mut self, step_duration: f64) -> Result<()> {
        if !step_duration.is_finite() || step_duration <= 0.0 {
            return Err(Error::StepDuration(step_duration));
        }
        self.step_duration = step_duration;
        Ok(())
    }

    pub fn set_step_height(&mut self, step_height: f64) -> Result<()> {
        if !step_height.is_finite() || step_height < 0.0 {
            return Err(Error::StepHeight(step_height));
        }
        self.step_height = step_height;
        Ok(())
    }

    pub fn set_step_horizontal_phase_delay(&mut self, delay: f64) -> Result<()> {
        if !delay.is_finite() || !(0.0..1.0).contains(&delay) {
            return Err(Error::PhaseDelay(delay));
        }
        self.horizontal_phase_delay = delay;
        Ok(())
    }

    pub fn set_foot_penetration(&mut self, penetration: f64) -> Result<()> {
        if !penetration.is_finite() {
            return Err(Error::NonFinite {
                what: "foot_penetration",
            });
        }
        self.foot_penetration = penetration;
        Ok(())
    }

    pub fn set_com_height(&mut self, com_height: f64) -> Result<()> {
        if !com_height.is_finite() || com_height <= 0.0 {
            return Err(Error::ComHeight(com_height));
        }
        self.com_height = com_height;
        Ok(())
    }

    pub fn set_interpolation_method(&mut self, method: InterpolationMethod) {
        self.interpolation = method;
    }

    #[must_use]
    pub fn sample_time(&self) -> f64 {
        self.sample_time
    }

    #[must_use]
    pub fn step_duration(&self) -> f64 {
        self.step_duration
    }

    #[must_use]
    pub fn com_height(&self) -> f64 {
        self.com_height
    }

    /// The integrated yaw reference.
    #[must_use]
    pub fn yaw_reference(&self) -> f64 {
        self.yaw
    }

    #[must_use]
    pub fn step_count(&self) -> u64 {
        self.clock.step_count()
    }

    /// LIP natural frequency `√(g / z_c)`.
    #[must_use]
    pub fn natural_frequency(&self) -> f64 {
        (GRAVITY / self.com_height).sqrt()
    }

    /// Captures the start-up base pose and footprint geometry.
    ///
    /// The measured foot positions become the stance anchors and their
    /// heading-frame offsets from the base the nominal footprint kept for
    /// every later touchdown.
    pub fn update_initial_conditions(
        &mut self,
        base_position: &Vector3<f64>,
        yaw: f64,
        feet_positions: &[Vector3<f64>; 4],
    ) {
        self.yaw = yaw;
        self.com_position = base_position.xy();
        self.com_velocity = Vector2::zeros();
        self.footholds = *feet_positions;

        let unrotate = Rotation2::new(-yaw);
        for foot in Foot::ALL {
            let offset = feet_positions[foot.index()].xy() - base_position.xy();
            self.nominal_offsets[foot.index()] = unrotate * offset;
        }

        self.clock.reset();
        self.gait = TrotGait::default();
        self.arcs = [None; 4];
        self.initialized = true;
        self.planned = false;
    }

    /// Runs one planner tick and returns the desired generalized pose.
    pub fn update(
        &mut self,
        com_position: &Vector3<f64>,
        com_velocity: &Vector3<f64>,
        com_acceleration: &Vector3<f64>,
        velocity_command: &Vector2<f64>,
        yaw_rate_command: f64,
        plane: &TerrainPlane,
        feet_positions: &[Vector3<f64>; 4],
        feet_velocities: &[Vector3<f64>; 4],
    ) -> Result<GeneralizedPose> {
        if !self.initialized {
            return Err(Error::NotInitialized);
        }
        validate_finite("com_position", com_position.iter())?;
        validate_finite("com_velocity", com_velocity.iter())?;
        validate_finite("com_acceleration", com_acceleration.iter())?;
        validate_finite("velocity_command", velocity_command.iter())?;
        validate_finite("yaw_rate_command", [yaw_rate_command].iter())?;
        if !plane.is_finite() {
            return Err(Error::NonFinite {
                what: "terrain_plane",
            });
        }
        for foot in Foot::ALL {
            validate_finite("feet_positions", feet_positions[foot.index()].iter())?;
            validate_finite("feet_velocities", feet_velocities[foot.index()].iter())?;
        }

        let dt = self.sample_time;
        self.yaw += yaw_rate_command * dt;

        let wrapped = self.clock.advance(dt / self.step_duration);
        if wrapped || !self.planned {
            self.plan_step(
                wrapped,
                com_position,
                com_velocity,
                velocity_command,
                yaw_rate_command,
                plane,
                feet_positions,
            );
            self.planned = true;
        }

        // pendulum dynamics about the stance centroid
        let omega_squared = GRAVITY / self.com_height;
        let centroid = self.stance_centroid();
        let planar_acceleration = (self.com_position - centroid) * omega_squared;
        self.com_velocity += planar_acceleration * dt;
        self.com_position += self.com_velocity * dt;

        let roll = plane.roll();
        let pitch = plane.pitch();
        let base_quat = UnitQuaternion::from_euler_angles(roll, pitch, self.yaw);

        let base_height = self.com_height * roll.cos() * pitch.cos()
            + plane.height_at(self.com_position.x, self.com_position.y);
        let vertical_velocity =
            plane.a_x * self.com_velocity.x + plane.a_y * self.com_velocity.y;

        let swing = self.gait.swing_feet();
        let mut feet_pos = DVector::zeros(3 * swing.count());
        let mut feet_vel = DVector::zeros(3 * swing.count());
        let mut feet_acc = DVector::zeros(3 * swing.count());
        for (row, foot) in swing.iter().enumerate() {
            let arc = self.arcs[foot.index()]
                .expect("every swing foot has a planned arc");
            let (position, velocity, acceleration) = self.sample_arc(&arc, self.clock.phase());
            feet_pos.rows_mut(3 * row, 3).copy_from(&position);
            feet_vel.rows_mut(3 * row, 3).copy_from(&velocity);
            feet_acc.rows_mut(3 * row, 3).copy_from(&acceleration);
        }

        Ok(GeneralizedPose {
            base_pos: Vector3::new(self.com_position.x, self.com_position.y, base_height),
            base_vel: Vector3::new(
                self.com_velocity.x,
                self.com_velocity.y,
                vertical_velocity,
            ),
            base_acc: *com_acceleration,
            base_quat,
            base_angvel: Vector3::new(0.0, 0.0, yaw_rate_command),
            feet_pos,
            feet_vel,
            feet_acc,
            contact_feet: self.gait.stance_feet(),
        })
    }

    /// Swing arcs sampled as polylines, one per swinging foot, for logging
    /// and visualisation collaborators.
    #[must_use]
    pub fn trajectory_samples(&self, samples: usize) -> Vec<Vec<Vector3<f64>>> {
        self.gait
            .swing_feet()
            .iter()
            .filter_map(|foot| self.arcs[foot.index()])
            .map(|arc| {
                (0..samples)
                    .map(|index| {
                        let phase = index as f64 / (samples.max(2) - 1) as f64;
                        self.sample_arc(&arc, phase).0
                    })
                    .collect()
            })
            .collect()
    }

    /// Commits the contact sets for the next step and plans the swing arcs.
    fn plan_step(
        &mut self,
        alternate: bool,
        com_position: &Vector3<f64>,
        com_velocity: &Vector3<f64>,
        velocity_command: &Vector2<f64>,
        yaw_rate_command: f64,
        plane: &TerrainPlane,
        feet_positions: &[Vector3<f64>; 4],
    ) {
        if alternate {
            self.gait.alternate();
        }

        // re-sync the pendulum state with the measurements
        self.com_position = com_position.xy();
        self.com_velocity = com_velocity.xy();

        // fresh stance anchors from the measured touchdown positions
        for foot in self.gait.stance_feet().iter() {
            self.footholds[foot.index()] = feet_positions[foot.index()];
        }

        let period = self.step_duration;
        let omega = self.natural_frequency();
        let growth = (omega * period).exp();

        let centroid = self.stance_centroid();
        let dcm = self.com_position + self.com_velocity / omega;
        let dcm_end = centroid + (dcm - centroid) * growth;

        // capture-point placement: in steady state the DCM leads the
        // footprint by v·T / (e^{ωT} − 1)
        let desired_velocity = Rotation2::new(self.yaw) * velocity_command;
        let offset = desired_velocity * period / (growth - 1.0);
        let next_centroid = dcm_end - offset;

        let touchdown_yaw = Rotation2::new(self.yaw + yaw_rate_command * period);
        for foot in self.gait.swing_feet().iter() {
            let horizontal =
                next_centroid + touchdown_yaw * self.nominal_offsets[foot.index()];
            let height =
                plane.height_at(horizontal.x, horizontal.y) - self.foot_penetration;
            let target = Vector3::new(horizontal.x, horizontal.y, height);

            self.arcs[foot.index()] = Some(SwingArc {
                start: feet_positions[foot.index()],
                target,
            });
            self.footholds[foot.index()] = target;
        }
        for foot in self.gait.stance_feet().iter() {
            self.arcs[foot.index()] = None;
        }

        debug!(
            step = self.clock.step_count(),
            swing = ?self.gait.swing_feet(),
            "planned step"
        );
    }

    fn stance_centroid(&self) -> Vector2<f64> {
        let stance = self.gait.stance_feet();
        let sum: Vector2<f64> = stance
            .iter()
            .map(|foot| self.footholds[foot.index()].xy())
            .sum();
        sum / stance.count() as f64
    }

    /// Evaluates a swing arc at `phase ∈ [0, 1)`.
    ///
    /// The horizontal motion waits out the configured phase delay; the
    /// vertical motion is a symmetric two-segment arc peaking `step_height`
    /// above the higher end point at phase one half.
    fn sample_arc(&self, arc: &SwingArc, phase: f64) -> SwingSample {
        let period = self.step_duration;
        let delay = self.horizontal_phase_delay;

        let mut position = Vector3::zeros();
        let mut velocity = Vector3::zeros();
        let mut acceleration = Vector3::zeros();

        // horizontal, delayed
        if phase <= delay {
            position.x = arc.start.x;
            position.y = arc.start.y;
        } else {
            let span = 1.0 - delay;
            let rate = 1.0 / (span * period);
            let horizontal_phase = ((phase - delay) / span).clamp(0.0, 1.0);
            let (value, first, second) = self.interpolation.profile(horizontal_phase);

            for axis in 0..2 {
                let difference = arc.target[axis] - arc.start[axis];
                position[axis] = arc.start[axis] + difference * value;
                velocity[axis] = difference * first * rate;
                acceleration[axis] = difference * second * rate * rate;
            }
        }

        // vertical, two segments through the apex
        let apex = arc.start.z.max(arc.target.z) + self.step_height;
        let rate = 2.0 / period;
        let (from, to, segment_phase) = if phase < 0.5 {
            (arc.start.z, apex, 2.0 * phase)
        } else {
            (apex, arc.target.z, 2.0 * phase - 1.0)
        };
        let (value, first, second) = self.interpolation.profile(segment_phase);
        let difference = to - from;
        position.z = from + difference * value;
        velocity.z = difference * first * rate;
        acceleration.z = difference * second * rate * rate;

        (position, velocity, acceleration)
    }
}

fn validate_finite<'a>(
    what: &'static str,
    values: impl Iterator<Item = &'a f64>,
) -> Result<()> {
    for value in values {
        if !value.is_finite() {
            return Err(Error::NonFinite { what });
        }
    }
    Ok(())
}
