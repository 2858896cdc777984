//! Tracklet selector: hit-ownership arbitration.
//!
//! Pass one lets every eligible tracklet raise the weight slot of each of its
//! hits to its own packed weight. Pass two keeps a hit only where the slot
//! still holds the tracklet's weight. Because `fetch_max` is commutative the
//! result does not depend on the order in which tracklets are visited.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use std::sync::atomic::Ordering;

use catrack_core::{Track, TrackHit, TrackerConfig, Tracklet};
use rayon::prelude::*;

use crate::slice::SliceData;

/// Scale applied to chi2/ndf before it is folded into the weight.
const QUALITY_SCALE: f32 = 256.0;

/// Packs the ownership weight of a tracklet.
///
/// Layout: hit count in bits 48..64, fit quality in bits 32..48 and the
/// complemented tracklet id in bits 0..32. More hits win, then a lower
/// chi2/ndf, then the lower id.
#[must_use]
pub fn pack_weight(tracklet: &Tracklet) -> u64 {
    let scaled = (tracklet.chi2_per_ndf() * QUALITY_SCALE)
        .round()
        .clamp(0.0, f32::from(u16::MAX)) as u16;
    let quality = u16::MAX - scaled;
    let count = tracklet.len().min(usize::from(u16::MAX)) as u64;
    (count << 48) | (u64::from(quality) << 32) | u64::from(u32::MAX - tracklet.id)
}

/// Pass one for a single tracklet.
pub fn mark_tracklet(slice: &SliceData, tracklet: &Tracklet, min_hits: usize) {
    if tracklet.len() < min_hits {
        return;
    }
    let weight = pack_weight(tracklet);
    for hit in &tracklet.hits {
        slice
            .weight(usize::from(hit.row), hit.index as usize)
            .fetch_max(weight, Ordering::AcqRel);
    }
}

/// Pass two for a single tracklet.
///
/// Returns the track (if enough hits survive) and the number of hits lost.
#[must_use]
pub fn resolve_tracklet(
    slice: &SliceData,
    tracklet: &Tracklet,
    min_hits: usize,
) -> (Option<Track>, usize) {
    if tracklet.len() < min_hits {
        return (None, 0);
    }
    let weight = pack_weight(tracklet);
    let hits: Vec<TrackHit> = tracklet
        .hits
        .iter()
        .filter(|h| slice.weight_value(usize::from(h.row), h.index as usize) == weight)
        .map(|h| TrackHit {
            row: h.row,
            hit: slice.hit(usize::from(h.row), h.index as usize).id,
        })
        .collect();
    let dropped = tracklet.len() - hits.len();
    if hits.len() < min_hits {
        return (None, dropped);
    }
    let track = Track {
        hits,
        chi2: tracklet.chi2,
        ndf: tracklet.ndf,
        params: tracklet.params,
    };
    (Some(track), dropped)
}

/// Outcome of the selection stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Accepted tracks ordered by (first kept row, tracklet id).
    pub tracks: Vec<Track>,
    /// Tracklets rejected for falling below the minimum length.
    pub rejected: usize,
    /// Hits removed from tracklets that lost arbitration.
    pub dropped_hits: usize,
}

/// Orders resolved `(tracklet id, track, dropped hits)` entries into the
/// final selection.
///
/// Tracks are keyed on the row of their first surviving hit, which differs
/// from the tracklet's first row when arbitration took that hit.
#[must_use]
pub fn collect_selection(resolved: Vec<(u32, Option<Track>, usize)>) -> Selection {
    let mut selection = Selection::default();
    let mut kept: Vec<(u16, u32, Track)> = Vec::with_capacity(resolved.len());
    for (id, track, dropped) in resolved {
        selection.dropped_hits += dropped;
        match track {
            Some(track) => kept.push((track.first_row().unwrap_or(0), id, track)),
            None => selection.rejected += 1,
        }
    }
    kept.sort_by_key(|&(row, id, _)| (row, id));
    selection.tracks = kept.into_iter().map(|(_, _, track)| track).collect();
    selection
}

/// Runs both selection passes.
pub fn select_tracks(
    slice: &mut SliceData,
    tracklets: &[Tracklet],
    config: &TrackerConfig,
    parallel: bool,
) -> Selection {
    slice.reset_weights();
    let slice: &SliceData = slice;
    let min_hits = usize::from(config.min_hits);

    let resolve = |t: &Tracklet| {
        let (track, dropped) = resolve_tracklet(slice, t, min_hits);
        (t.id, track, dropped)
    };

    let resolved: Vec<_> = if parallel {
        tracklets
            .par_iter()
            .for_each(|t| mark_tracklet(slice, t, min_hits));
        tracklets.par_iter().map(resolve).collect()
    } else {
        for t in tracklets {
            mark_tracklet(slice, t, min_hits);
        }
        tracklets.iter().map(resolve).collect()
    };
    collect_selection(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use catrack_core::{Hit, SliceGeometry, SliceInput, TrackParams, TrackletHit};

    fn tracklet(id: u32, hits: &[(u16, u32)], chi2: f32) -> Tracklet {
        Tracklet {
            id,
            hits: hits.iter().map(|&(r, i)| TrackletHit::new(r, i)).collect(),
            chi2,
            ndf: 2 * (hits.len() as u16 - 1),
            params: TrackParams::default(),
        }
    }

    fn slice() -> SliceData {
        let hits = (0..4u16)
            .flat_map(|r| {
                let y = f32::from(r);
                [
                    Hit::new(u32::from(r) * 2, r, y, 0.0),
                    Hit::new(u32::from(r) * 2 + 1, r, y + 10.0, 0.0),
                ]
            })
            .collect();
        let input = SliceInput::new(0, SliceGeometry::uniform(4, 80.0, 1.0), hits);
        SliceData::build(&input, false).expect("valid slice")
    }

    #[test]
    fn test_weight_ordering() {
        let long = tracklet(5, &[(0, 0), (1, 0), (2, 0), (3, 0)], 40.0);
        let short = tracklet(0, &[(0, 0), (1, 0), (2, 0)], 0.0);
        assert!(pack_weight(&long) > pack_weight(&short));

        let good = tracklet(9, &[(0, 0), (1, 0), (2, 0)], 0.5);
        let bad = tracklet(1, &[(0, 0), (1, 0), (2, 0)], 4.0);
        assert!(pack_weight(&good) > pack_weight(&bad));

        let a = tracklet(1, &[(0, 0), (1, 0), (2, 0)], 1.0);
        let b = tracklet(2, &[(0, 0), (1, 0), (2, 0)], 1.0);
        assert!(pack_weight(&a) > pack_weight(&b));
    }

    #[test]
    fn test_shared_hit_goes_to_stronger_tracklet() {
        let mut slice = slice();
        let config = TrackerConfig::default();
        let strong = tracklet(0, &[(0, 0), (1, 0), (2, 0), (3, 0)], 1.0);
        let weak = tracklet(1, &[(0, 1), (1, 1), (2, 0), (3, 1)], 1.0);

        let selection = select_tracks(&mut slice, &[strong, weak], &config, false);
        assert_eq!(selection.tracks.len(), 2);
        assert_eq!(selection.tracks[0].len(), 4);
        assert_eq!(selection.tracks[1].len(), 3);
        assert_eq!(selection.dropped_hits, 1);
        assert_eq!(selection.rejected, 0);
    }

    #[test]
    fn test_loser_below_minimum_is_rejected() {
        let mut slice = slice();
        let config = TrackerConfig::default().with_min_hits(4);
        let strong = tracklet(0, &[(0, 0), (1, 0), (2, 0), (3, 0)], 1.0);
        let weak = tracklet(1, &[(0, 1), (1, 1), (2, 0), (3, 1)], 1.0);

        let selection = select_tracks(&mut slice, &[strong, weak], &config, true);
        assert_eq!(selection.tracks.len(), 1);
        assert_eq!(selection.rejected, 1);
    }

    #[test]
    fn test_tracks_ordered_by_first_kept_hit() {
        let mut slice = slice();
        let config = TrackerConfig::default();
        let loser = tracklet(0, &[(0, 0), (1, 1), (2, 1), (3, 1)], 8.0);
        let winner = tracklet(1, &[(0, 0), (1, 0), (2, 0), (3, 0)], 1.0);

        let selection = select_tracks(&mut slice, &[loser, winner], &config, false);
        let first_rows: Vec<u16> = selection.tracks.iter().map(|t| t.hits[0].row).collect();
        assert_eq!(first_rows, vec![0, 1]);
        assert_eq!(selection.tracks[0].len(), 4);
        assert_eq!(selection.dropped_hits, 1);
    }

    #[test]
    fn test_order_independent() {
        let config = TrackerConfig::default();
        let a = tracklet(0, &[(0, 0), (1, 0), (2, 0)], 2.0);
        let b = tracklet(1, &[(1, 0), (2, 1), (3, 1)], 0.5);

        let mut s1 = slice();
        let mut s2 = slice();
        let forward = select_tracks(&mut s1, &[a.clone(), b.clone()], &config, false);
        let backward = select_tracks(&mut s2, &[b, a], &config, true);
        assert_eq!(forward, backward);
    }
}
