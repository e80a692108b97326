//! Point-to-point interpolation polynomials.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Blending polynomial used for the horizontal part of a swing arc and for
/// the warm-up pose interpolation.
#[derive(
    Debug,
    Default,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    EnumIter,
)]
pub enum InterpolationMethod {
    #[strum(serialize = "linear")]
    #[serde(rename = "linear")]
    Linear,
    /// Cubic with zero end velocities.
    #[strum(serialize = "spline_3")]
    #[serde(rename = "spline_3")]
    Spline3,
    /// Quintic with zero end velocities and accelerations.
    #[default]
    #[strum(serialize = "spline_5")]
    #[serde(rename = "spline_5")]
    Spline5,
}

impl InterpolationMethod {
    /// Blending profile and its first two phase derivatives at `phase`.
    #[must_use]
    pub fn profile(self, phase: f64) -> (f64, f64, f64) {
        let s = phase.clamp(0.0, 1.0);
        match self {
            InterpolationMethod::Linear => (s, 1.0, 0.0),
            InterpolationMethod::Spline3 => (
                s * s * (3.0 - 2.0 * s),
                6.0 * s * (1.0 - s),
                6.0 - 12.0 * s,
            ),
            InterpolationMethod::Spline5 => (
                s * s * s * (10.0 - 15.0 * s + 6.0 * s * s),
                30.0 * s * s * (1.0 - s) * (1.0 - s),
                s * (60.0 - 180.0 * s + 120.0 * s * s),
            ),
        }
    }
}

/// Interpolates from `from` to `to` at `phase ∈ [0, 1]`.
///
/// Velocity and acceleration are derivatives with respect to the phase; the
/// caller applies the time scaling of its own phase clock.
#[must_use]
pub fn spline(
    from: &Vector3<f64>,
    to: &Vector3<f64>,
    phase: f64,
    method: InterpolationMethod,
) -> (Vector3<f64>, Vector3<f64>, Vector3<f64>) {
    let difference = to - from;
    let (value, first, second) = method.profile(phase);

    (
        from + difference * value,
        difference * first,
        difference * second,
    )
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn endpoints_are_exact() {
        let from = Vector3::new(1.0, -2.0, 0.5);
        let to = Vector3::new(-0.5, 3.0, 1.0);

        for method in InterpolationMethod::iter() {
            let (start, _, _) = spline(&from, &to, 0.0, method);
            let (end, _, _) = spline(&from, &to, 1.0, method);
            assert_relative_eq!(start, from, epsilon = 1e-12);
            assert_relative_eq!(end, to, epsilon = 1e-12);
        }
    }

    #[test]
    fn spline_boundary_derivatives_vanish() {
        for method in [InterpolationMethod::Spline3, InterpolationMethod::Spline5] {
            assert_relative_eq!(method.profile(0.0).1, 0.0);
            assert_relative_eq!(method.profile(1.0).1, 0.0);
        }

        // only the quintic also has vanishing boundary accelerations
        assert_relative_eq!(InterpolationMethod::Spline5.profile(0.0).2, 0.0);
        assert_relative_eq!(InterpolationMethod::Spline5.profile(1.0).2, 0.0);
    }

    #[test]
    fn profiles_match_finite_differences() {
        let epsilon = 1e-6;
        for method in InterpolationMethod::iter() {
            for phase in [0.2, 0.5, 0.77] {
                let (_, first, second) = method.profile(phase);
                let ahead = method.profile(phase + epsilon).0;
                let behind = method.profile(phase - epsilon).0;

                assert_relative_eq!(first, (ahead - behind) / (2.0 * epsilon), epsilon = 1e-5);
                let first_ahead = method.profile(phase + epsilon).1;
                let first_behind = method.profile(phase - epsilon).1;
                assert_relative_eq!(
                    second,
                    (first_ahead - first_behind) / (2.0 * epsilon),
                    epsilon = 1e-5
                );
            }
        }
    }

    #[test]
    fn phase_is_clamped() {
        let from = Vector3::zeros();
        let to = Vector3::new(1.0, 0.0, 0.0);
        let (early, _, _) = spline(&from, &to, -0.5, InterpolationMethod::Spline5);
        let (late, _, _) = spline(&from, &to, 1.5, InterpolationMethod::Spline5);

        assert_relative_eq!(early, from);
        assert_relative_eq!(late, to);
    }

    #[test]
    fn method_names_parse() {
        assert_eq!(
            "spline_5".parse::<InterpolationMethod>().unwrap(),
            InterpolationMethod::Spline5
        );
        assert_eq!(
            "linear".parse::<InterpolationMethod>().unwrap(),
            InterpolationMethod::Linear
        );
        assert!("spline_7".parse::<InterpolationMethod>().is_err());
    }
}
