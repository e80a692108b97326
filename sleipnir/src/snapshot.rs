//! Double-buffered sensor snapshots.
//!
//! Middleware callbacks deliver sensor data on their own threads; the
//! control thread takes one consistent snapshot at the start of every tick.
//! The slot is a sequence lock: a version counter is bumped to odd before a
//! write and back to even after it, and a reader retries until it observes
//! the same even version on both sides of its copy. The writer never waits.

use std::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU64, Ordering},
};

use legged::TerrainPlane;
use motion::PlannerInputs;
use nalgebra::{DVector, UnitQuaternion, Vector2, Vector3};

/// One full set of sensor inputs, in SI units.
///
/// `q` is `[base position, base quaternion xyzw, joint angles]`, `v` the
/// matching velocities with world-frame base twist.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSample {
    pub q: [f64; 19],
    pub v: [f64; 18],
    /// Base linear acceleration in the body frame.
    pub body_acceleration: [f64; 3],
    pub feet_positions: [[f64; 3]; 4],
    pub feet_velocities: [[f64; 3]; 4],
    /// Terrain plane coefficients `(a_x, a_y, c)`.
    pub plane: [f64; 3],
    /// Measured terrain penetration per foot, canonical order.
    pub penetrations: [f64; 4],
    /// Forward, lateral and yaw-rate command.
    pub velocity_command: [f64; 3],
    /// Producer timestamp in seconds.
    pub timestamp: f64,
}

impl Default for SensorSample {
    fn default() -> Self {
        let mut q = [0.0; 19];
        q[6] = 1.0; // identity quaternion, scalar last

        Self {
            q,
            v: [0.0; 18],
            body_acceleration: [0.0; 3],
            feet_positions: [[0.0; 3]; 4],
            feet_velocities: [[0.0; 3]; 4],
            plane: [0.0; 3],
            penetrations: [0.0; 4],
            velocity_command: [0.0; 3],
            timestamp: 0.0,
        }
    }
}

impl SensorSample {
    #[must_use]
    pub fn base_position(&self) -> Vector3<f64> {
        Vector3::new(self.q[0], self.q[1], self.q[2])
    }

    pub fn base_quat(&self) -> legged::Result<UnitQuaternion<f64>> {
        legged::quat::from_xyzw(self.q[3], self.q[4], self.q[5], self.q[6])
    }

    #[must_use]
    pub fn generalized_coordinates(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.q)
    }

    #[must_use]
    pub fn generalized_velocities(&self) -> DVector<f64> {
        DVector::from_column_slice(&self.v)
    }

    /// The planner-facing view of this sample.
    ///
    /// Fails when the base quaternion is not unit, which the caller treats
    /// like any other per-tick precondition violation.
    pub fn planner_inputs(&self) -> legged::Result<PlannerInputs> {
        Ok(PlannerInputs {
            base_position: self.base_position(),
            base_quat: self.base_quat()?,
            base_velocity: Vector3::new(self.v[0], self.v[1], self.v[2]),
            body_acceleration: Vector3::from_column_slice(&self.body_acceleration),
            velocity_command: Vector2::new(self.velocity_command[0], self.velocity_command[1]),
            yaw_rate_command: self.velocity_command[2],
            plane: TerrainPlane::new(self.plane[0], self.plane[1], self.plane[2]),
            feet_positions: self.feet_positions.map(|foot| Vector3::from_column_slice(&foot)),
            feet_velocities: self.feet_velocities.map(|foot| Vector3::from_column_slice(&foot)),
        })
    }
}

/// A single-writer, any-reader slot holding the latest `T`.
///
/// Readers copy the value out; torn reads are detected through the version
/// counter and retried. The single writer is the middleware side.
pub struct SensorSlot<T: Copy> {
    version: AtomicU64,
    value: UnsafeCell<T>,
}

// SAFETY: all access to `value` is guarded by the seqlock protocol below;
// readers only ever use a copy that the version counter proved consistent.
unsafe impl<T: Copy + Send> Sync for SensorSlot<T> {}

impl<T: Copy> SensorSlot<T> {
    #[must_use]
    pub fn new(initial: T) -> Self {
        Self {
            version: AtomicU64::new(0),
            value: UnsafeCell::new(initial),
        }
    }

    /// Publishes a new value. Must only be called from one thread.
    pub fn publish(&self, value: T) {
        // odd version: write in progress
        self.version.fetch_add(1, Ordering::Acquire);
        // SAFETY: single writer; concurrent readers detect the odd version
        // or the version change and retry.
        unsafe { std::ptr::write_volatile(self.value.get(), value) };
        self.version.fetch_add(1, Ordering::Release);
    }

    /// Takes a consistent snapshot of the current value.
    #[must_use]
    pub fn read(&self) -> T {
        loop {
            let before = self.version.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            // SAFETY: a torn copy is possible here, but it is discarded
            // below unless the version was stable across the copy.
            let value = unsafe { std::ptr::read_volatile(self.value.get()) };

            if self.version.load(Ordering::Acquire) == before {
                return value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    };

    use super::*;

    #[test]
    fn reads_return_the_latest_publish() {
        let slot = SensorSlot::new(SensorSample::default());

        let mut sample = SensorSample::default();
        sample.timestamp = 1.25;
        sample.velocity_command = [0.3, 0.0, 0.1];
        slot.publish(sample);

        assert_eq!(slot.read(), sample);
    }

    #[test]
    fn snapshots_are_never_torn() {
        // every published sample has all entries equal; a torn read would mix
        let slot = Arc::new(SensorSlot::new([0.0f64; 16]));
        let stop = Arc::new(AtomicBool::new(false));

        let writer = {
            let slot = Arc::clone(&slot);
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut counter = 0.0;
                while !stop.load(Ordering::Relaxed) {
                    counter += 1.0;
                    slot.publish([counter; 16]);
                }
            })
        };

        for _ in 0..100_000 {
            let snapshot = slot.read();
            assert!(
                snapshot.iter().all(|value| *value == snapshot[0]),
                "torn read: {snapshot:?}"
            );
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }

    #[test]
    fn default_sample_parses_into_planner_inputs() {
        let sample = SensorSample::default();
        let inputs = sample.planner_inputs().unwrap();
        assert_eq!(inputs.base_quat, UnitQuaternion::identity());

        let mut bad = sample;
        bad.q[6] = 0.5;
        assert!(bad.planner_inputs().is_err());
    }
}
