//! Neighbours finder and consensus cleaner.
//!
//! The finder gives every hit at most one backward and one forward link.
//! Interior hits pick the most collinear (down, up) pair: the down
//! candidate supplies the local slope used to predict the up candidate.
//! Hits without such a pair (and hits on the first or last row) fall back
//! to single-sided links predicted by pointing at the slice origin.
//!
//! The cleaner keeps a link only when both endpoints chose each other,
//! turning the link graph into disjoint, non-branching chains.
#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use catrack_core::{Result, TrackerConfig};

use crate::slice::{map_indexed, ArenaHit, SliceData, NO_LINK};

/// Candidate ranking: lowest chi-square first, then lowest hit ids.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Ranked<T> {
    chi2: f32,
    key: (u32, u32),
    value: T,
}

impl<T> Ranked<T> {
    fn beats(&self, other: &Option<Self>) -> bool {
        match other {
            None => true,
            Some(best) => {
                self.chi2 < best.chi2 || (self.chi2 == best.chi2 && self.key < best.key)
            }
        }
    }
}

/// Best single-sided link from `hit` (in `row`) into `target`, predicting
/// along the line through the slice origin.
///
/// Without a slope the prediction itself is uncertain; that uncertainty is
/// taken as a third of the search window.
fn best_origin_link(
    slice: &SliceData,
    config: &TrackerConfig,
    row: usize,
    hit: ArenaHit,
    target: usize,
) -> Option<usize> {
    let target_row = slice.row(target);
    let scale = target_row.x / slice.row(row).x;
    let (py, pz) = (hit.y * scale, hit.z * scale);
    let window = config.search_window;
    let prediction_var = (window / 3.0) * (window / 3.0);

    let mut best: Option<Ranked<usize>> = None;
    for k in target_row.grid.query(py, pz, window, window) {
        let cand = slice.hit(target, k);
        let (dy, dz) = (cand.y - py, cand.z - pz);
        if dy.abs() > window || dz.abs() > window {
            continue;
        }
        let chi2 = dy * dy / (hit.err_y2 + cand.err_y2 + prediction_var)
            + dz * dz / (hit.err_z2 + cand.err_z2 + prediction_var);
        if chi2 > config.link_chi2_cut {
            continue;
        }
        let ranked = Ranked {
            chi2,
            key: (cand.id, 0),
            value: k,
        };
        if ranked.beats(&best) {
            best = Some(ranked);
        }
    }
    best.map(|b| b.value)
}

/// Most collinear (down, up) pair around an interior hit.
fn best_pair(
    slice: &SliceData,
    config: &TrackerConfig,
    row: usize,
    hit: ArenaHit,
) -> Option<(usize, usize)> {
    let (down_row, up_row) = (slice.row(row - 1), slice.row(row + 1));
    let x = slice.row(row).x;
    let (dx_down, dx_up) = (x - down_row.x, up_row.x - x);
    let rho = dx_up / dx_down;
    let window = config.search_window;

    let scale = down_row.x / x;
    let (dy0, dz0) = (hit.y * scale, hit.z * scale);

    let mut best: Option<Ranked<(usize, usize)>> = None;
    for d in down_row.grid.query(dy0, dz0, window, window) {
        let down = slice.hit(row - 1, d);
        if (down.y - dy0).abs() > window || (down.z - dz0).abs() > window {
            continue;
        }
        let py = hit.y + (hit.y - down.y) * rho;
        let pz = hit.z + (hit.z - down.z) * rho;
        let lever = (1.0 + rho) * (1.0 + rho);
        let base_var_y = lever * hit.err_y2 + rho * rho * down.err_y2;
        let base_var_z = lever * hit.err_z2 + rho * rho * down.err_z2;

        for u in up_row.grid.query(py, pz, window, window) {
            let up = slice.hit(row + 1, u);
            let (ry, rz) = (up.y - py, up.z - pz);
            if ry.abs() > window || rz.abs() > window {
                continue;
            }
            let chi2 = ry * ry / (base_var_y + up.err_y2) + rz * rz / (base_var_z + up.err_z2);
            if chi2 > config.link_chi2_cut {
                continue;
            }
            let ranked = Ranked {
                chi2,
                key: (up.id, down.id),
                value: (d, u),
            };
            if ranked.beats(&best) {
                best = Some(ranked);
            }
        }
    }
    best.map(|b| b.value)
}

fn to_link(index: Option<usize>) -> i32 {
    index.map_or(NO_LINK, |i| i as i32)
}

/// Finds the `(up, down)` link slots of one hit.
#[must_use]
pub fn find_hit_links(
    slice: &SliceData,
    config: &TrackerConfig,
    row: usize,
    index: usize,
) -> (i32, i32) {
    let hit = slice.hit(row, index);
    let has_down = row > 0;
    let has_up = row + 1 < slice.n_rows();

    if has_down && has_up {
        if let Some((d, u)) = best_pair(slice, config, row, hit) {
            return (u as i32, d as i32);
        }
        // No up candidate is consistent with any down candidate: keep the
        // backward link alone if there is one, else look forward from the origin.
        let down = best_origin_link(slice, config, row, hit, row - 1);
        if down.is_some() {
            return (NO_LINK, to_link(down));
        }
        return (to_link(best_origin_link(slice, config, row, hit, row + 1)), NO_LINK);
    }

    let up = if has_up {
        best_origin_link(slice, config, row, hit, row + 1)
    } else {
        None
    };
    let down = if has_down {
        best_origin_link(slice, config, row, hit, row - 1)
    } else {
        None
    };
    (to_link(up), to_link(down))
}

/// Consensus-filtered `(up, down)` link slots of one hit.
#[must_use]
pub fn clean_hit_links(slice: &SliceData, row: usize, index: usize) -> (i32, i32) {
    let this = index as i32;
    let up = slice.link_up(row, index);
    let up = if up != NO_LINK && slice.link_down(row + 1, up as usize) == this {
        up
    } else {
        NO_LINK
    };
    let down = slice.link_down(row, index);
    let down = if down != NO_LINK && slice.link_up(row - 1, down as usize) == this {
        down
    } else {
        NO_LINK
    };
    (up, down)
}

/// Applies a per-hit link kernel to every hit and installs the result.
fn apply_kernel<F>(slice: &mut SliceData, parallel: bool, kernel: F) -> Result<()>
where
    F: Fn(&SliceData, usize, usize) -> (i32, i32) + Sync + Send,
{
    let view: &SliceData = slice;
    let per_row: Vec<Vec<(i32, i32)>> = map_indexed(view.n_rows(), parallel, |r| {
        (0..view.row(r).n_hits).map(|i| kernel(view, r, i)).collect()
    });
    let (up, down): (Vec<i32>, Vec<i32>) = per_row.into_iter().flatten().unzip();
    slice.set_links(up, down)
}

/// Runs the neighbours finder over the whole slice.
///
/// Returns the number of forward links set.
///
/// # Errors
/// Returns a data error if a computed link falls outside its target row.
pub fn find_neighbours(slice: &mut SliceData, config: &TrackerConfig, parallel: bool) -> Result<usize> {
    apply_kernel(slice, parallel, |s, r, i| find_hit_links(s, config, r, i))?;
    Ok(slice.count_links_up())
}

/// Runs the consensus cleaner over the whole slice.
///
/// Returns the number of surviving forward links.
///
/// # Errors
/// Returns a data error if a link slot is out of range.
pub fn clean_neighbours(slice: &mut SliceData, parallel: bool) -> Result<usize> {
    apply_kernel(slice, parallel, clean_hit_links)?;
    Ok(slice.count_links_up())
}

#[cfg(test)]
mod tests {
    use super::*;
    use catrack_core::{Hit, SliceGeometry, SliceInput};

    fn build(hits: Vec<Hit>, n_rows: usize) -> SliceData {
        let input = SliceInput::new(0, SliceGeometry::uniform(n_rows, 80.0, 1.0), hits);
        SliceData::build(&input, false).expect("valid slice")
    }

    fn line(first_id: u32, n_rows: u16, slope_y: f32) -> Vec<Hit> {
        (0..n_rows)
            .map(|r| {
                let x = 80.0 + f32::from(r);
                Hit::new(first_id + u32::from(r), r, slope_y * x, 0.02 * x)
            })
            .collect()
    }

    #[test]
    fn test_straight_line_links_every_row() {
        let mut slice = build(line(0, 5, 0.1), 5);
        let config = TrackerConfig::default();
        let raw = find_neighbours(&mut slice, &config, false).expect("finder");
        assert_eq!(raw, 4);
        let clean = clean_neighbours(&mut slice, false).expect("cleaner");
        assert_eq!(clean, 4);

        for r in 0..4 {
            assert_eq!(slice.link_up(r, 0), 0);
            assert_eq!(slice.link_down(r + 1, 0), 0);
        }
        assert_eq!(slice.link_down(0, 0), NO_LINK);
        assert_eq!(slice.link_up(4, 0), NO_LINK);
    }

    #[test]
    fn test_isolated_hit_gets_no_links() {
        let mut hits = line(0, 5, 0.1);
        hits.push(Hit::new(100, 2, -40.0, 30.0));
        let mut slice = build(hits, 5);
        let config = TrackerConfig::default();
        find_neighbours(&mut slice, &config, false).expect("finder");

        let index = slice
            .row_hits(2)
            .iter()
            .position(|h| h.id == 100)
            .expect("noise hit present");
        assert_eq!(slice.link_up(2, index), NO_LINK);
        assert_eq!(slice.link_down(2, index), NO_LINK);
    }

    #[test]
    fn test_consensus_invariant_after_cleaning() {
        let mut hits = line(0, 6, 0.1);
        hits.extend(line(10, 6, 0.12));
        hits.extend(line(20, 6, 0.08));
        hits.push(Hit::new(50, 3, 8.45, 1.66));
        let mut slice = build(hits, 6);
        let config = TrackerConfig::default();
        find_neighbours(&mut slice, &config, true).expect("finder");
        clean_neighbours(&mut slice, true).expect("cleaner");

        for r in 0..slice.n_rows() {
            for i in 0..slice.row(r).n_hits {
                let up = slice.link_up(r, i);
                if up != NO_LINK {
                    assert_eq!(slice.link_down(r + 1, up as usize), i as i32);
                }
                let down = slice.link_down(r, i);
                if down != NO_LINK {
                    assert_eq!(slice.link_up(r - 1, down as usize), i as i32);
                }
            }
        }
    }

    #[test]
    fn test_finder_is_idempotent() {
        let mut hits = line(0, 6, 0.1);
        hits.extend(line(10, 6, 0.11));
        let mut slice = build(hits, 6);
        let config = TrackerConfig::default();
        find_neighbours(&mut slice, &config, false).expect("finder");
        let first: Vec<i32> = (0..6).flat_map(|r| slice.row_links_up(r).to_vec()).collect();
        find_neighbours(&mut slice, &config, true).expect("finder");
        let second: Vec<i32> = (0..6).flat_map(|r| slice.row_links_up(r).to_vec()).collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_equal_chi2_prefers_lowest_id() {
        // Two identical candidates in row 1: the lower caller id must win.
        let hits = vec![
            Hit::new(0, 0, 8.0, 1.6),
            Hit::new(7, 1, 8.1, 1.62),
            Hit::new(3, 1, 8.1, 1.62),
        ];
        let mut slice = build(hits, 2);
        find_neighbours(&mut slice, &TrackerConfig::default(), false).expect("finder");
        let up = slice.link_up(0, 0);
        assert_ne!(up, NO_LINK);
        assert_eq!(slice.hit(1, up as usize).id, 3);
    }
}
