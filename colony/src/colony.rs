//! Colony value type.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// A detected or operator-placed colony.
///
/// Plain value type: two colonies are "the same" for matching purposes when
/// their centers lie within a tolerance, not when they share an identity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Colony {
    /// X coordinate (pixels, column)
    pub x: f64,
    /// Y coordinate (pixels, row)
    pub y: f64,
    /// Equivalent-circle radius (pixels)
    #[serde(default)]
    pub radius: f64,
}

impl Colony {
    pub fn new(x: f64, y: f64, radius: f64) -> Self {
        Self { x, y, radius }
    }

    /// Colony whose radius is that of a circle with the given pixel area.
    pub fn from_area(x: f64, y: f64, area: f64) -> Self {
        Self {
            x,
            y,
            radius: (area / PI).sqrt(),
        }
    }

    /// Area of the equivalent circle
    pub fn area(&self) -> f64 {
        PI * self.radius * self.radius
    }

    /// Distance between colony centers in pixels
    pub fn distance_to(&self, other: &Colony) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }

    /// Whether the two centers lie within `tolerance` pixels of each other.
    pub fn matches(&self, other: &Colony, tolerance: f64) -> bool {
        self.distance_to(other) <= tolerance
    }

    /// Reject coordinates that cannot describe a point on a plate.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !self.x.is_finite() || !self.y.is_finite() {
            return Err(ValidationError::MalformedColony(format!(
                "non-finite position ({}, {})",
                self.x, self.y
            )));
        }
        if !self.radius.is_finite() || self.radius < 0.0 {
            return Err(ValidationError::MalformedColony(format!(
                "radius must be finite and >= 0, got {}",
                self.radius
            )));
        }
        Ok(())
    }
}

/// Index of the colony in `candidates` nearest to `point` within `tolerance`.
pub fn nearest_match(point: &Colony, candidates: &[Colony], tolerance: f64) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .map(|(idx, candidate)| (idx, candidate.distance_to(point)))
        .filter(|&(_, distance)| distance <= tolerance)
        .min_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(idx, _)| idx)
}
