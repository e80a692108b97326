//! Terrain plane estimate.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// The terrain approximated as a plane `z = a_x * x + a_y * y + c`.
///
/// The coefficients come from an external terrain estimator; a default plane
/// is flat ground at zero height.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TerrainPlane {
    pub a_x: f64,
    pub a_y: f64,
    pub c: f64,
}

impl TerrainPlane {
    #[must_use]
    pub fn new(a_x: f64, a_y: f64, c: f64) -> Self {
        Self { a_x, a_y, c }
    }

    /// Plane height below the horizontal position `(x, y)`.
    #[must_use]
    pub fn height_at(&self, x: f64, y: f64) -> f64 {
        self.a_x * x + self.a_y * y + self.c
    }

    /// Roll reference for a base aligned with the plane.
    #[must_use]
    pub fn roll(&self) -> f64 {
        self.a_y.atan()
    }

    /// Pitch reference for a base aligned with the plane.
    #[must_use]
    pub fn pitch(&self) -> f64 {
        -self.a_x.atan()
    }

    /// Upward unit normal of the plane.
    #[must_use]
    pub fn normal(&self) -> Vector3<f64> {
        Vector3::new(-self.a_x, -self.a_y, 1.0).normalize()
    }

    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.a_x.is_finite() && self.a_y.is_finite() && self.c.is_finite()
    }
}
