//! Runs the stack against the built-in single-body model.
//!
//! Stands the model quadruped at nominal height, feeds it static sensor
//! samples and logs the torque commands. Useful as a smoke check of the
//! whole pipeline without a robot or a simulator attached.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use miette::IntoDiagnostic;
use rbd::{BodyParams, RigidBodyDynamics, SingleBodyModel};
use tracing::info;
use tracing_subscriber::EnvFilter;
use wbc::{PrioritizedTasks, WholeBodyController};

use sleipnir::{ControlLoop, SensorSample, SensorSlot, SleipnirConfig};

fn main() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = SleipnirConfig::default();
    let engine = config.trot_engine()?;
    let controller = WholeBodyController::new(
        SingleBodyModel::new(BodyParams::default()),
        PrioritizedTasks::new(config.control_tasks()?),
    );
    let (mut control_loop, _commands) =
        ControlLoop::new(engine, controller, &config.control_loop);

    let slot = Arc::new(SensorSlot::new(standing_sample()));
    let shutdown = Arc::new(AtomicBool::new(false));

    // a stand-in for the middleware: republish the standing pose with a
    // fresh timestamp at a sensor-ish rate
    let feeder = {
        let slot = Arc::clone(&slot);
        let shutdown = Arc::clone(&shutdown);
        std::thread::spawn(move || {
            let start = std::time::Instant::now();
            while !shutdown.load(Ordering::Relaxed) {
                let mut sample = standing_sample();
                sample.timestamp = start.elapsed().as_secs_f64();
                slot.publish(sample);
                std::thread::sleep(std::time::Duration::from_millis(1));
            }
        })
    };

    {
        let shutdown = Arc::clone(&shutdown);
        ctrlc_like_timer(shutdown, std::time::Duration::from_secs(5));
    }

    let outcome = control_loop.run(&slot, &shutdown, |command| {
        if command.tick % 250 == 0 {
            info!(
                tick = command.tick,
                torque_norm = command.torques.norm(),
                "publishing torques"
            );
        }
    });

    shutdown.store(true, Ordering::Relaxed);
    feeder.join().expect("feeder thread panicked");

    info!(
        ticks = control_loop.ticks(),
        published = control_loop.published(),
        overruns = control_loop.overruns(),
        "loop finished"
    );

    outcome.into_diagnostic()
}

/// Flips the shutdown flag after the demo duration.
fn ctrlc_like_timer(shutdown: Arc<AtomicBool>, after: std::time::Duration) {
    std::thread::spawn(move || {
        std::thread::sleep(after);
        shutdown.store(true, Ordering::Relaxed);
    });
}

fn standing_sample() -> SensorSample {
    let mut model = SingleBodyModel::new(BodyParams::default());
    let q = model.standing_q(0.5);
    let v = nalgebra::DVector::zeros(18);
    model
        .compute_eom(&q, &v)
        .expect("standing state has valid dimensions");

    let mut sample = SensorSample::default();
    sample.q.copy_from_slice(q.as_slice());
    sample.body_acceleration = [0.0, 0.0, 9.81];
    for (slot, position) in sample
        .feet_positions
        .iter_mut()
        .zip(model.feet_positions())
    {
        slot.copy_from_slice(position.as_slice());
    }
    sample
}
