//! Synthetic slices shared by the integration tests.
#![allow(dead_code, clippy::cast_possible_truncation)]

use catrack_core::{Hit, SliceGeometry, SliceInput, Track};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Radius of row 0.
pub const X0: f32 = 80.0;

/// Evenly spaced geometry starting at [`X0`] with unit pitch.
pub fn geometry(n_rows: usize) -> SliceGeometry {
    SliceGeometry::uniform(n_rows, X0, 1.0)
}

/// Radius of row `row`.
pub fn x(row: u16) -> f32 {
    X0 + f32::from(row)
}

/// Hits of the straight line `y = slope_y * x`, `z = slope_z * x` on `rows`.
pub fn line(first_id: u32, rows: std::ops::Range<u16>, slope_y: f32, slope_z: f32) -> Vec<Hit> {
    rows.enumerate()
        .map(|(k, r)| Hit::new(first_id + k as u32, r, slope_y * x(r), slope_z * x(r)))
        .collect()
}

/// Random slice: straight tracks with small jitter plus uniform noise.
pub fn random_slice(seed: u64, n_rows: u16, n_tracks: usize, n_noise: usize) -> SliceInput {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut hits = Vec::new();
    let mut next_id = 0u32;

    for _ in 0..n_tracks {
        let first = rng.gen_range(0..n_rows.saturating_sub(3).max(1));
        let last = rng.gen_range(first + 2..n_rows);
        let y0 = rng.gen_range(-20.0f32..20.0);
        let z0 = rng.gen_range(-20.0f32..20.0);
        let ty = rng.gen_range(-0.3f32..0.3);
        let tz = rng.gen_range(-0.3f32..0.3);
        for r in first..=last {
            let dx = x(r) - X0;
            let y = y0 + ty * dx + rng.gen_range(-0.02f32..0.02);
            let z = z0 + tz * dx + rng.gen_range(-0.02f32..0.02);
            hits.push(Hit::new(next_id, r, y, z));
            next_id += 1;
        }
    }
    for _ in 0..n_noise {
        let r = rng.gen_range(0..n_rows);
        let y = rng.gen_range(-30.0f32..30.0);
        let z = rng.gen_range(-30.0f32..30.0);
        hits.push(Hit::new(next_id, r, y, z));
        next_id += 1;
    }

    // The pipeline must not depend on input order.
    for i in (1..hits.len()).rev() {
        let j = rng.gen_range(0..=i);
        hits.swap(i, j);
    }
    SliceInput::new(0, geometry(usize::from(n_rows)), hits)
}

/// Hit ids of every track, in output order.
pub fn track_ids(tracks: &[Track]) -> Vec<Vec<u32>> {
    tracks.iter().map(|t| t.hit_ids().collect()).collect()
}
