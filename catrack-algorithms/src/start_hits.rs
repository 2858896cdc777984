//! Start-hit finder and sorter.
//!
//! A start hit has a consensus forward link and no consensus backward link.
//! The sorter compacts the per-row lists into one row-ordered array whose
//! positions are the tracklet ids.
#![allow(clippy::cast_possible_truncation)]

use catrack_core::{Error, Result, ScratchArray};
use rayon::prelude::*;

use crate::slice::{map_indexed, SliceData, NO_LINK};

/// Origin of one chain: row and row-local hit index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct StartHit {
    /// Row of the hit.
    pub row: u16,
    /// Index of the hit within its row.
    pub index: u32,
}

impl StartHit {
    /// Creates a start hit.
    #[inline]
    #[must_use]
    pub fn new(row: u16, index: u32) -> Self {
        Self { row, index }
    }
}

/// Returns true if the hit starts a chain.
#[inline]
#[must_use]
pub fn is_start_hit(slice: &SliceData, row: usize, index: usize) -> bool {
    slice.link_up(row, index) != NO_LINK && slice.link_down(row, index) == NO_LINK
}

/// Start hits of one row, in row-local index order.
#[must_use]
pub fn find_row_start_hits(slice: &SliceData, row: usize) -> Vec<StartHit> {
    (0..slice.row(row).n_hits)
        .filter(|&i| is_start_hit(slice, row, i))
        .map(|i| StartHit::new(row as u16, i as u32))
        .collect()
}

/// Runs the finder over every row.
#[must_use]
pub fn find_start_hits(slice: &SliceData, parallel: bool) -> Vec<Vec<StartHit>> {
    map_indexed(slice.n_rows(), parallel, |r| find_row_start_hits(slice, r))
}

/// Exclusive prefix sum of the per-row counts plus the total.
#[must_use]
pub fn row_offsets(per_row: &[Vec<StartHit>]) -> (Vec<usize>, usize) {
    let mut offsets = Vec::with_capacity(per_row.len());
    let mut total = 0;
    for row in per_row {
        offsets.push(total);
        total += row.len();
    }
    (offsets, total)
}

/// Compacts the per-row lists into one row-ordered array.
///
/// # Errors
/// Returns [`Error::CapacityExceeded`] if the total exceeds `capacity`.
pub fn sort_start_hits(
    per_row: &[Vec<StartHit>],
    capacity: usize,
    parallel: bool,
) -> Result<Vec<StartHit>> {
    let (_, total) = row_offsets(per_row);
    if total > capacity {
        return Err(Error::CapacityExceeded {
            array: ScratchArray::StartHits,
            required: total,
            capacity,
        });
    }
    let mut sorted = vec![StartHit::default(); total];
    if total == 0 {
        return Ok(sorted);
    }

    // Carve the destination into one disjoint slice per row.
    let mut chunks: Vec<&mut [StartHit]> = Vec::with_capacity(per_row.len());
    let mut rest = sorted.as_mut_slice();
    for row in per_row {
        let (head, tail) = rest.split_at_mut(row.len());
        chunks.push(head);
        rest = tail;
    }

    if parallel {
        chunks
            .into_par_iter()
            .zip(per_row.par_iter())
            .for_each(|(dst, src)| dst.copy_from_slice(src));
    } else {
        for (dst, src) in chunks.into_iter().zip(per_row) {
            dst.copy_from_slice(src);
        }
    }
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(counts: &[usize]) -> Vec<Vec<StartHit>> {
        counts
            .iter()
            .enumerate()
            .map(|(r, &n)| (0..n).map(|i| StartHit::new(r as u16, i as u32)).collect())
            .collect()
    }

    #[test]
    fn test_offsets() {
        let (offsets, total) = row_offsets(&rows(&[2, 0, 3, 1]));
        assert_eq!(offsets, vec![0, 2, 2, 5]);
        assert_eq!(total, 6);
    }

    #[test]
    fn test_sort_is_row_ordered() {
        let per_row = rows(&[2, 0, 3, 1]);
        let sequential = sort_start_hits(&per_row, 100, false).expect("fits");
        let parallel = sort_start_hits(&per_row, 100, true).expect("fits");
        assert_eq!(sequential, parallel);
        assert_eq!(sequential.len(), 6);
        assert!(sequential.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sequential[2], StartHit::new(2, 0));
    }

    #[test]
    fn test_zero_total() {
        let sorted = sort_start_hits(&rows(&[0, 0, 0]), 0, true).expect("empty fits");
        assert!(sorted.is_empty());
    }

    #[test]
    fn test_capacity_exceeded() {
        let err = sort_start_hits(&rows(&[3, 2]), 4, false).unwrap_err();
        assert!(matches!(
            err,
            Error::CapacityExceeded {
                array: ScratchArray::StartHits,
                required: 5,
                capacity: 4
            }
        ));
        assert_eq!(err.overflow(), Some((ScratchArray::StartHits, 1)));
    }
}
