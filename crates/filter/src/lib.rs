//! # Filter
//!
//! This crate provides a set of filtering algorithms and utilities to help you filter your noisy ahh data.

use std::ops::{Add, Mul};

use nalgebra::Vector3;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Smoothing factor {0} is outside (0, 1]")]
    Beta(f64),
    #[error("Sample time {0} is not positive")]
    SampleTime(f64),
}

pub type Result<T> = std::result::Result<T, Error>;

/// A single-pole low-pass filter over any value with a weighted sum.
#[derive(Debug, Default, Clone, Copy)]
pub struct LowPassFilter<T> {
    pub state: T,
    smoothing: f64,
}

impl<T> LowPassFilter<T>
where
    T: Copy + Add<Output = T> + Mul<f64, Output = T>,
{
    /// Creates a filter that blends `smoothing` of each new value into the state.
    pub fn new(initial: T, smoothing: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&smoothing) || smoothing == 0.0 {
            return Err(Error::Beta(smoothing));
        }

        Ok(LowPassFilter {
            state: initial,
            smoothing,
        })
    }

    /// Update the current state of this [`LowPassFilter`] using the new value.
    pub fn update(&mut self, value: T) -> T {
        self.state = self.state * (1.0 - self.smoothing) + value * self.smoothing;
        self.state
    }
}

/// An IIR low-pass filter: a cascade of `order` identical single-pole
/// sections applied componentwise to 3D samples.
///
/// `beta` is the per-sample smoothing weight of each section at the nominal
/// tick; a stretched or shortened tick rescales the pole so the cutoff stays
/// put. Order zero is a pass-through. Section storage is allocated once at
/// construction.
#[derive(Debug, Clone)]
pub struct IirFilter {
    beta: f64,
    nominal_dt: Option<f64>,
    sections: Vec<Vector3<f64>>,
}

impl IirFilter {
    pub fn new(order: usize, beta: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&beta) || beta == 0.0 {
            return Err(Error::Beta(beta));
        }

        Ok(Self {
            beta,
            nominal_dt: None,
            sections: vec![Vector3::zeros(); order],
        })
    }

    #[must_use]
    pub fn order(&self) -> usize {
        self.sections.len()
    }

    /// Filters one sample taken `dt` seconds after the previous one.
    ///
    /// The first sample fixes the nominal tick.
    pub fn filter(&mut self, sample: Vector3<f64>, dt: f64) -> Result<Vector3<f64>> {
        if dt <= 0.0 || !dt.is_finite() {
            return Err(Error::SampleTime(dt));
        }

        let nominal_dt = *self.nominal_dt.get_or_insert(dt);
        let weight = 1.0 - (1.0 - self.beta).powf(dt / nominal_dt);

        let mut value = sample;
        for section in &mut self.sections {
            *section += (value - *section) * weight;
            value = *section;
        }

        Ok(value)
    }

    /// Zeroes the filter history.
    pub fn reset(&mut self) {
        for section in &mut self.sections {
            section.fill(0.0);
        }
    }
}
