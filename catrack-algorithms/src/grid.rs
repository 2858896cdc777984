//! Per-row spatial index.
//!
//! Hits of a row are binned over (y, z) and stably sorted by bin, so every
//! bin is a contiguous index range. A window query visits one contiguous
//! range per z-bin, which keeps lookups near-constant for typical occupancy.
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

/// Upper bound on bins per axis.
const MAX_BINS_PER_AXIS: usize = 128;

/// Binned index over the hits of one row.
#[derive(Debug, Clone, PartialEq)]
pub struct Grid {
    y_min: f32,
    y_max: f32,
    z_min: f32,
    z_max: f32,
    step_y_inv: f32,
    step_z_inv: f32,
    n_y: usize,
    n_z: usize,
    /// `first_hit_in_bin[b]..first_hit_in_bin[b + 1]` are the hits of bin `b`.
    first_hit_in_bin: Vec<u32>,
}

impl Grid {
    /// Builds a grid over unsorted coordinates.
    ///
    /// Returns the grid and the permutation that puts the hits into grid
    /// order: `order[k]` is the input position of the `k`-th hit in the
    /// grid. Hits sharing a bin keep their input order.
    #[must_use]
    pub fn build(ys: &[f32], zs: &[f32]) -> (Self, Vec<u32>) {
        debug_assert_eq!(ys.len(), zs.len());
        let n = ys.len();
        if n == 0 {
            return (Self::empty(), Vec::new());
        }

        let (y_min, y_max) = bounds(ys);
        let (z_min, z_max) = bounds(zs);

        let per_axis = ((n as f64).sqrt().ceil() as usize).clamp(1, MAX_BINS_PER_AXIS);
        let step_y_inv = inverse_step(y_min, y_max, per_axis);
        let step_z_inv = inverse_step(z_min, z_max, per_axis);

        let mut grid = Self {
            y_min,
            y_max,
            z_min,
            z_max,
            step_y_inv,
            step_z_inv,
            n_y: per_axis,
            n_z: per_axis,
            first_hit_in_bin: Vec::new(),
        };

        let bins: Vec<usize> = ys
            .iter()
            .zip(zs)
            .map(|(&y, &z)| grid.bin(grid.bin_y(y), grid.bin_z(z)))
            .collect();

        // Counting sort keeps hits of the same bin in input order.
        let n_bins = grid.n_bins();
        let mut counts = vec![0u32; n_bins + 1];
        for &bin in &bins {
            counts[bin + 1] += 1;
        }
        for b in 0..n_bins {
            counts[b + 1] += counts[b];
        }
        grid.first_hit_in_bin.clone_from(&counts);

        let mut order = vec![0u32; n];
        for (input, &bin) in bins.iter().enumerate() {
            let slot = &mut counts[bin];
            order[*slot as usize] = input as u32;
            *slot += 1;
        }

        (grid, order)
    }

    fn empty() -> Self {
        Self {
            y_min: 0.0,
            y_max: 0.0,
            z_min: 0.0,
            z_max: 0.0,
            step_y_inv: 1.0,
            step_z_inv: 1.0,
            n_y: 1,
            n_z: 1,
            first_hit_in_bin: vec![0, 0],
        }
    }

    /// Number of bins.
    #[inline]
    #[must_use]
    pub fn n_bins(&self) -> usize {
        self.n_y * self.n_z
    }

    /// Number of indexed hits.
    #[inline]
    #[must_use]
    pub fn n_hits(&self) -> usize {
        self.first_hit_in_bin.last().copied().unwrap_or(0) as usize
    }

    /// Hit range of bin `bin`.
    #[inline]
    #[must_use]
    pub fn bin_range(&self, bin: usize) -> std::ops::Range<usize> {
        self.first_hit_in_bin[bin] as usize..self.first_hit_in_bin[bin + 1] as usize
    }

    #[inline]
    fn bin(&self, iy: usize, iz: usize) -> usize {
        iz * self.n_y + iy
    }

    #[inline]
    fn bin_y(&self, y: f32) -> usize {
        axis_bin(y, self.y_min, self.step_y_inv, self.n_y)
    }

    #[inline]
    fn bin_z(&self, z: f32) -> usize {
        axis_bin(z, self.z_min, self.step_z_inv, self.n_z)
    }

    /// Returns the grid-order indices of all hits whose bins intersect the
    /// window `[y - dy, y + dy] x [z - dz, z + dz]`, in ascending order.
    ///
    /// The result is a superset of the hits inside the window; callers apply
    /// the exact cut. Windows that miss the row's extent yield nothing.
    pub fn query(&self, y: f32, z: f32, dy: f32, dz: f32) -> impl Iterator<Item = usize> + '_ {
        let outside = self.n_hits() == 0
            || y + dy < self.y_min
            || y - dy > self.y_max
            || z + dz < self.z_min
            || z - dz > self.z_max;

        let (iy0, iy1, iz0, iz1) = if outside {
            (0, 0, 1, 0)
        } else {
            (
                self.bin_y(y - dy),
                self.bin_y(y + dy),
                self.bin_z(z - dz),
                self.bin_z(z + dz),
            )
        };

        (iz0..=iz1).flat_map(move |iz| {
            let first = self.first_hit_in_bin[self.bin(iy0, iz)] as usize;
            let last = self.first_hit_in_bin[self.bin(iy1, iz) + 1] as usize;
            first..last
        })
    }
}

fn bounds(values: &[f32]) -> (f32, f32) {
    values
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        })
}

fn inverse_step(min: f32, max: f32, bins: usize) -> f32 {
    let step = (max - min) / bins as f32;
    if step > f32::EPSILON {
        1.0 / step
    } else {
        1.0
    }
}

#[inline]
fn axis_bin(value: f32, min: f32, step_inv: f32, bins: usize) -> usize {
    let raw = ((value - min) * step_inv).floor();
    if raw <= 0.0 {
        0
    } else {
        (raw as usize).min(bins - 1)
    }
}
