//! Tracklet and track types.

use serde::{Deserialize, Serialize};

/// A hit referenced by its row and its row-local index in the slice arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackletHit {
    /// Row of the hit.
    pub row: u16,
    /// Index of the hit within its row.
    pub index: u32,
}

impl TrackletHit {
    /// Creates a row-local hit reference.
    #[inline]
    #[must_use]
    pub fn new(row: u16, index: u32) -> Self {
        Self { row, index }
    }
}

/// Straight-line parameters at the last fitted hit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackParams {
    /// Radial position of the reference point.
    pub x: f32,
    /// Transverse position.
    pub y: f32,
    /// Longitudinal position.
    pub z: f32,
    /// Transverse slope `dy/dx`.
    pub dy_dx: f32,
    /// Longitudinal slope `dz/dx`.
    pub dz_dx: f32,
}

/// A finished chain produced by the tracklet constructor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tracklet {
    /// Position of the seeding start hit in the sorted start-hit array.
    pub id: u32,
    /// Hits in strictly increasing row order.
    pub hits: Vec<TrackletHit>,
    /// Accumulated fit chi-square.
    pub chi2: f32,
    /// Degrees of freedom of the accumulated chi-square.
    pub ndf: u16,
    /// Fit parameters at the last hit.
    pub params: TrackParams,
}

impl Tracklet {
    /// Number of hits.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the tracklet has no hits.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Chi-square per degree of freedom (zero when `ndf == 0`).
    #[must_use]
    pub fn chi2_per_ndf(&self) -> f32 {
        if self.ndf == 0 {
            0.0
        } else {
            self.chi2 / f32::from(self.ndf)
        }
    }
}

/// A hit of an output track, identified by the caller's stable hit id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrackHit {
    /// Row of the hit.
    pub row: u16,
    /// Caller-side hit id.
    pub hit: u32,
}

/// An accepted, conflict-free track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    /// Hits ordered by row.
    pub hits: Vec<TrackHit>,
    /// Fit chi-square of the originating tracklet.
    pub chi2: f32,
    /// Degrees of freedom of `chi2`.
    pub ndf: u16,
    /// Fit parameters at the last hit of the originating tracklet.
    pub params: TrackParams,
}

impl Track {
    /// Number of hits.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the track has no hits.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Row of the first hit.
    #[must_use]
    pub fn first_row(&self) -> Option<u16> {
        self.hits.first().map(|hit| hit.row)
    }

    /// Iterator over the caller hit ids.
    pub fn hit_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.hits.iter().map(|hit| hit.hit)
    }
}
