//! Hit and slice geometry types.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default position error (cm) used when an input omits it.
pub const DEFAULT_POSITION_ERROR: f32 = 0.05;

fn default_error() -> f32 {
    DEFAULT_POSITION_ERROR
}

/// A detector space point.
///
/// The radial coordinate is implied by the row (see [`SliceGeometry`]).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hit {
    /// Stable caller-side index.
    pub id: u32,
    /// Row the hit was measured in.
    pub row: u16,
    /// Transverse coordinate.
    pub y: f32,
    /// Longitudinal coordinate.
    pub z: f32,
    /// Position error in y.
    #[serde(default = "default_error")]
    pub err_y: f32,
    /// Position error in z.
    #[serde(default = "default_error")]
    pub err_z: f32,
}

impl Hit {
    /// Creates a hit with the default position errors.
    #[inline]
    #[must_use]
    pub fn new(id: u32, row: u16, y: f32, z: f32) -> Self {
        Self {
            id,
            row,
            y,
            z,
            err_y: DEFAULT_POSITION_ERROR,
            err_z: DEFAULT_POSITION_ERROR,
        }
    }

    /// Sets the position errors.
    #[must_use]
    pub fn with_errors(mut self, err_y: f32, err_z: f32) -> Self {
        self.err_y = err_y;
        self.err_z = err_z;
        self
    }

    /// Checks the hit against a slice with `n_rows` rows.
    ///
    /// # Errors
    /// Returns a data error if the row is out of range, a coordinate is not
    /// finite or an error is not strictly positive.
    pub fn validate(&self, n_rows: usize) -> Result<()> {
        if usize::from(self.row) >= n_rows {
            return Err(Error::InvalidRow {
                hit: self.id,
                row: self.row,
                n_rows,
            });
        }
        if !self.y.is_finite() || !self.z.is_finite() {
            return Err(Error::InvalidHit {
                hit: self.id,
                reason: "non-finite coordinate",
            });
        }
        if !(self.err_y > 0.0 && self.err_z > 0.0) || !self.err_y.is_finite() || !self.err_z.is_finite()
        {
            return Err(Error::InvalidHit {
                hit: self.id,
                reason: "position errors must be finite and positive",
            });
        }
        Ok(())
    }
}

/// Radial layout of the rows in one slice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceGeometry {
    /// Radial position of each row, strictly increasing.
    pub row_x: Vec<f32>,
}

impl SliceGeometry {
    /// Creates a geometry from explicit row radii.
    #[must_use]
    pub fn new(row_x: Vec<f32>) -> Self {
        Self { row_x }
    }

    /// Evenly spaced rows starting at `x0`.
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn uniform(n_rows: usize, x0: f32, pitch: f32) -> Self {
        Self {
            row_x: (0..n_rows).map(|r| x0 + pitch * r as f32).collect(),
        }
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.row_x.len()
    }

    /// Radial position of `row`.
    #[inline]
    #[must_use]
    pub fn x(&self, row: usize) -> f32 {
        self.row_x[row]
    }

    /// Validates the geometry.
    ///
    /// Origin-pointing predictions scale by `x[r'] / x[r]`, so every row must
    /// sit at a finite, positive radius.
    ///
    /// # Errors
    /// Returns [`Error::InvalidGeometry`] for empty, oversized, non-positive
    /// or non-increasing layouts.
    pub fn validate(&self) -> Result<()> {
        if self.row_x.is_empty() {
            return Err(Error::InvalidGeometry("no rows".to_string()));
        }
        if self.row_x.len() > usize::from(u16::MAX) {
            return Err(Error::InvalidGeometry(format!(
                "{} rows exceed the supported maximum of {}",
                self.row_x.len(),
                u16::MAX
            )));
        }
        for (row, &x) in self.row_x.iter().enumerate() {
            if !x.is_finite() || x <= 0.0 {
                return Err(Error::InvalidGeometry(format!(
                    "row {row} has invalid radius {x}"
                )));
            }
        }
        if let Some(row) = self.row_x.windows(2).position(|w| w[1] <= w[0]) {
            return Err(Error::InvalidGeometry(format!(
                "row radii must increase strictly (rows {row} and {})",
                row + 1
            )));
        }
        Ok(())
    }
}
