//! Straight-line Kalman fit used by the tracklet constructor.
//!
//! One filter per projection plane: state `(p, t)` is the position and the
//! slope `dp/dx`, covariance `[c00, c01, c11]`.

/// Initial slope variance of a seeded fit.
pub const SEED_SLOPE_VARIANCE: f32 = 1.0;

/// Linear fit in one projection plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    /// Position at the current reference x.
    pub p: f32,
    /// Slope `dp/dx`.
    pub t: f32,
    /// Position variance.
    pub c00: f32,
    /// Position-slope covariance.
    pub c01: f32,
    /// Slope variance.
    pub c11: f32,
}

impl LineFit {
    /// Seeds a fit at a measured position with a slope pointing to the origin.
    #[must_use]
    pub fn seed(position: f32, x: f32, variance: f32) -> Self {
        Self {
            p: position,
            t: position / x,
            c00: variance,
            c01: 0.0,
            c11: SEED_SLOPE_VARIANCE,
        }
    }

    /// Returns the fit transported by `dx`.
    #[must_use]
    pub fn predict(&self, dx: f32) -> Self {
        Self {
            p: self.p + self.t * dx,
            t: self.t,
            c00: self.c00 + dx * (2.0 * self.c01 + dx * self.c11),
            c01: self.c01 + dx * self.c11,
            c11: self.c11,
        }
    }

    /// Chi-square of a measurement against the current state.
    #[inline]
    #[must_use]
    pub fn chi2(&self, measurement: f32, variance: f32) -> f32 {
        let r = measurement - self.p;
        r * r / (self.c00 + variance)
    }

    /// Absorbs a measurement.
    pub fn update(&mut self, measurement: f32, variance: f32) {
        let r = measurement - self.p;
        let s = self.c00 + variance;
        let k0 = self.c00 / s;
        let k1 = self.c01 / s;
        let (c00, c01) = (self.c00, self.c01);

        self.p += k0 * r;
        self.t += k1 * r;
        self.c00 = c00 * (1.0 - k0);
        self.c01 = c01 * (1.0 - k0);
        self.c11 -= k1 * c01;
    }
}
