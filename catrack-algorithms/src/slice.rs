//! Slice arena: hits, links and weights of one slice in flat arrays.
//!
//! Hits are stored row by row in grid order. Link slots hold row-local
//! indices into the adjacent row (`-1` = none). Weight slots are atomics so
//! the selector can arbitrate ownership from any worker.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use catrack_core::{Error, Hit, Result, SliceInput};
use rayon::prelude::*;

use crate::grid::Grid;

/// Sentinel for an unset link slot.
pub const NO_LINK: i32 = -1;

/// Maps `f` over `0..n`, in parallel when requested.
///
/// Output order is the index order in both cases.
pub(crate) fn map_indexed<T, F>(n: usize, parallel: bool, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if parallel {
        (0..n).into_par_iter().map(f).collect()
    } else {
        (0..n).map(f).collect()
    }
}

/// One detector row: a contiguous range of the hit arena plus its grid.
#[derive(Debug, Clone)]
pub struct Row {
    /// Arena index of the first hit.
    pub first_hit: usize,
    /// Number of hits.
    pub n_hits: usize,
    /// Radial position.
    pub x: f32,
    /// Spatial index over the row's hits (grid order = arena order).
    pub grid: Grid,
}

/// A hit as stored in the arena.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArenaHit {
    /// Caller-side id.
    pub id: u32,
    /// Transverse coordinate.
    pub y: f32,
    /// Longitudinal coordinate.
    pub z: f32,
    /// Squared error in y.
    pub err_y2: f32,
    /// Squared error in z.
    pub err_z2: f32,
}

/// Per-slice processing context owning every arena.
#[derive(Debug)]
pub struct SliceData {
    slice: u32,
    rows: Vec<Row>,
    hits: Vec<ArenaHit>,
    link_up: Vec<i32>,
    link_down: Vec<i32>,
    weights: Vec<AtomicU64>,
}

impl SliceData {
    /// Validates the input and builds the arena and the per-row grids.
    ///
    /// # Errors
    /// Returns a data error for an invalid geometry, an invalid hit or a hit
    /// id used twice.
    pub fn build(input: &SliceInput, parallel: bool) -> Result<Self> {
        let geometry = &input.geometry;
        geometry.validate()?;
        let n_rows = geometry.n_rows();

        let mut per_row: Vec<Vec<&Hit>> = vec![Vec::new(); n_rows];
        let mut ids = HashSet::with_capacity(input.hits.len());
        for hit in &input.hits {
            hit.validate(n_rows)?;
            if !ids.insert(hit.id) {
                return Err(Error::InvalidHit {
                    hit: hit.id,
                    reason: "duplicate hit id",
                });
            }
            per_row[usize::from(hit.row)].push(hit);
        }

        let built: Vec<(Grid, Vec<ArenaHit>)> =
            map_indexed(n_rows, parallel, |r| build_row(&per_row[r]));

        let mut rows = Vec::with_capacity(n_rows);
        let mut hits = Vec::with_capacity(input.hits.len());
        for (r, (grid, row_hits)) in built.into_iter().enumerate() {
            rows.push(Row {
                first_hit: hits.len(),
                n_hits: row_hits.len(),
                x: geometry.x(r),
                grid,
            });
            hits.extend(row_hits);
        }

        let n_hits = hits.len();
        Ok(Self {
            slice: input.slice,
            rows,
            hits,
            link_up: vec![NO_LINK; n_hits],
            link_down: vec![NO_LINK; n_hits],
            weights: (0..n_hits).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    /// Slice number.
    #[inline]
    #[must_use]
    pub fn slice(&self) -> u32 {
        self.slice
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    /// Total number of hits.
    #[inline]
    #[must_use]
    pub fn n_hits(&self) -> usize {
        self.hits.len()
    }

    /// Row `r`.
    #[inline]
    #[must_use]
    pub fn row(&self, r: usize) -> &Row {
        &self.rows[r]
    }

    /// All rows.
    #[inline]
    #[must_use]
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Arena index of a row-local hit.
    #[inline]
    #[must_use]
    pub fn global(&self, row: usize, index: usize) -> usize {
        self.rows[row].first_hit + index
    }

    /// Hit `index` of row `row`.
    #[inline]
    #[must_use]
    pub fn hit(&self, row: usize, index: usize) -> ArenaHit {
        self.hits[self.global(row, index)]
    }

    /// Hits of row `row` in grid order.
    #[inline]
    #[must_use]
    pub fn row_hits(&self, row: usize) -> &[ArenaHit] {
        let r = &self.rows[row];
        &self.hits[r.first_hit..r.first_hit + r.n_hits]
    }

    /// Forward link of a row-local hit.
    #[inline]
    #[must_use]
    pub fn link_up(&self, row: usize, index: usize) -> i32 {
        self.link_up[self.global(row, index)]
    }

    /// Backward link of a row-local hit.
    #[inline]
    #[must_use]
    pub fn link_down(&self, row: usize, index: usize) -> i32 {
        self.link_down[self.global(row, index)]
    }

    /// Forward links of one row.
    #[must_use]
    pub fn row_links_up(&self, row: usize) -> &[i32] {
        let r = &self.rows[row];
        &self.link_up[r.first_hit..r.first_hit + r.n_hits]
    }

    /// Backward links of one row.
    #[must_use]
    pub fn row_links_down(&self, row: usize) -> &[i32] {
        let r = &self.rows[row];
        &self.link_down[r.first_hit..r.first_hit + r.n_hits]
    }

    /// Replaces both link arrays (arena order).
    ///
    /// # Errors
    /// Returns [`Error::LinkOutOfRange`] if any slot points outside the
    /// adjacent row; the arrays are left untouched in that case.
    pub fn set_links(&mut self, up: Vec<i32>, down: Vec<i32>) -> Result<()> {
        debug_assert_eq!(up.len(), self.hits.len());
        debug_assert_eq!(down.len(), self.hits.len());
        for (r, row) in self.rows.iter().enumerate() {
            for index in 0..row.n_hits {
                let g = row.first_hit + index;
                self.check_link(r, index, up[g], r + 1)?;
                self.check_link(r, index, down[g], r.wrapping_sub(1))?;
            }
        }
        self.link_up = up;
        self.link_down = down;
        Ok(())
    }

    fn check_link(&self, row: usize, hit: usize, link: i32, target: usize) -> Result<()> {
        if link == NO_LINK {
            return Ok(());
        }
        let valid = link >= 0
            && self
                .rows
                .get(target)
                .is_some_and(|t| (link as usize) < t.n_hits);
        if valid {
            Ok(())
        } else {
            Err(Error::LinkOutOfRange { row, hit, link })
        }
    }

    /// Number of set forward links.
    #[must_use]
    pub fn count_links_up(&self) -> usize {
        self.link_up.iter().filter(|&&l| l != NO_LINK).count()
    }

    /// Ownership weight slot of a row-local hit.
    #[inline]
    #[must_use]
    pub fn weight(&self, row: usize, index: usize) -> &AtomicU64 {
        &self.weights[self.global(row, index)]
    }

    /// Clears every weight slot.
    pub fn reset_weights(&mut self) {
        for weight in &mut self.weights {
            *weight.get_mut() = 0;
        }
    }

    /// Current weight value of a row-local hit.
    #[inline]
    #[must_use]
    pub fn weight_value(&self, row: usize, index: usize) -> u64 {
        self.weight(row, index).load(Ordering::Acquire)
    }
}

fn build_row(hits: &[&Hit]) -> (Grid, Vec<ArenaHit>) {
    let ys: Vec<f32> = hits.iter().map(|h| h.y).collect();
    let zs: Vec<f32> = hits.iter().map(|h| h.z).collect();
    let (grid, order) = Grid::build(&ys, &zs);
    let arena = order
        .iter()
        .map(|&i| {
            let hit = hits[i as usize];
            ArenaHit {
                id: hit.id,
                y: hit.y,
                z: hit.z,
                err_y2: hit.err_y * hit.err_y,
                err_z2: hit.err_z * hit.err_z,
            }
        })
        .collect();
    (grid, arena)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catrack_core::SliceGeometry;

    fn input() -> SliceInput {
        SliceInput::new(
            2,
            SliceGeometry::uniform(3, 80.0, 1.0),
            vec![
                Hit::new(10, 2, 1.0, 0.0),
                Hit::new(11, 0, 3.0, 0.0),
                Hit::new(12, 0, -3.0, 0.0),
                Hit::new(13, 2, -1.0, 0.5),
            ],
        )
    }

    #[test]
    fn test_build_groups_rows() {
        let slice = SliceData::build(&input(), false).expect("valid slice");
        assert_eq!(slice.slice(), 2);
        assert_eq!(slice.n_rows(), 3);
        assert_eq!(slice.n_hits(), 4);
        assert_eq!(slice.row(0).n_hits, 2);
        assert_eq!(slice.row(1).n_hits, 0);
        assert_eq!(slice.row(2).first_hit, 2);

        let mut ids: Vec<u32> = slice.row_hits(0).iter().map(|h| h.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![11, 12]);
    }

    #[test]
    fn test_parallel_build_matches_sequential() {
        let a = SliceData::build(&input(), false).expect("valid slice");
        let b = SliceData::build(&input(), true).expect("valid slice");
        assert_eq!(a.hits, b.hits);
    }

    #[test]
    fn test_invalid_row_is_fatal() {
        let mut bad = input();
        bad.hits.push(Hit::new(99, 3, 0.0, 0.0));
        let err = SliceData::build(&bad, false).unwrap_err();
        assert!(matches!(err, Error::InvalidRow { hit: 99, row: 3, .. }));
    }

    #[test]
    fn test_duplicate_id_is_fatal() {
        let mut bad = input();
        bad.hits.push(Hit::new(12, 1, 0.0, 0.0));
        let err = SliceData::build(&bad, false).unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidHit {
                hit: 12,
                reason: "duplicate hit id"
            }
        ));
    }

    #[test]
    fn test_set_links_rejects_out_of_range() {
        let mut slice = SliceData::build(&input(), false).expect("valid slice");
        let mut up = vec![NO_LINK; 4];
        up[0] = 0; // row 1 is empty
        let err = slice.set_links(up, vec![NO_LINK; 4]).unwrap_err();
        assert!(matches!(err, Error::LinkOutOfRange { row: 0, hit: 0, link: 0 }));
        assert_eq!(slice.count_links_up(), 0);
    }

    #[test]
    fn test_weights_reset() {
        let mut slice = SliceData::build(&input(), false).expect("valid slice");
        slice.weight(2, 1).fetch_max(42, Ordering::AcqRel);
        assert_eq!(slice.weight_value(2, 1), 42);
        slice.reset_weights();
        assert_eq!(slice.weight_value(2, 1), 0);
    }
}
