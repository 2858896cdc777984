//! Tracklet construction state machine.
//!
//! A task seeds a [`TrackletState`] from a start hit and extends it one row
//! at a time: first along the consensus link of the last hit, then, if that
//! fails, by probing a search road around the fit prediction. The state
//! pauses whenever the next row lies beyond the current row block.
#![allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]

use catrack_core::{TrackParams, TrackerConfig, Tracklet, TrackletHit};

use crate::fit::LineFit;
use crate::slice::{SliceData, NO_LINK};
use crate::start_hits::StartHit;

/// Mutable record of one chain under construction.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackletState {
    id: u32,
    /// Last processed row.
    row: u16,
    /// Reference x of both fits (row of the last accepted hit).
    x: f32,
    last_err_y2: f32,
    last_err_z2: f32,
    fit_y: LineFit,
    fit_z: LineFit,
    hits: Vec<TrackletHit>,
    n_misses: u16,
    chi2: f32,
    ndf: u16,
}

/// A unit of construction work.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackletTask {
    /// Not started yet.
    Fresh(StartHit),
    /// Checkpointed at a row-block boundary.
    Paused(TrackletState),
}

/// Result of running a task up to a terminal state or a block boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Long enough to compete in selection.
    Finished(Tracklet),
    /// Terminated below the minimum length.
    Abandoned,
    /// Reached the end of its row block with rows remaining.
    Paused(TrackletState),
}

impl TrackletState {
    /// Seeds a state on a start hit.
    #[must_use]
    pub fn seed(slice: &SliceData, id: u32, start: StartHit) -> Self {
        let row = usize::from(start.row);
        let hit = slice.hit(row, start.index as usize);
        let x = slice.row(row).x;
        Self {
            id,
            row: start.row,
            x,
            last_err_y2: hit.err_y2,
            last_err_z2: hit.err_z2,
            fit_y: LineFit::seed(hit.y, x, hit.err_y2),
            fit_z: LineFit::seed(hit.z, x, hit.err_z2),
            hits: vec![TrackletHit::new(start.row, start.index)],
            n_misses: 0,
            chi2: 0.0,
            ndf: 0,
        }
    }

    /// Tracklet id.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Last processed row.
    #[inline]
    #[must_use]
    pub fn row(&self) -> usize {
        usize::from(self.row)
    }

    /// Accepted hits so far.
    #[inline]
    #[must_use]
    pub fn hits(&self) -> &[TrackletHit] {
        &self.hits
    }

    /// Consecutive rows without an accepted hit.
    #[inline]
    #[must_use]
    pub fn n_misses(&self) -> u16 {
        self.n_misses
    }

    /// Returns true once no further row may be processed.
    #[must_use]
    pub fn is_terminal(&self, n_rows: usize, config: &TrackerConfig) -> bool {
        self.n_misses > config.max_misses || self.row() + 1 >= n_rows
    }

    /// Processes the next row.
    pub fn step(&mut self, slice: &SliceData, config: &TrackerConfig) {
        let next = self.row() + 1;
        let x_next = slice.row(next).x;
        let dx = x_next - self.x;
        let pred_y = self.fit_y.predict(dx);
        let pred_z = self.fit_z.predict(dx);

        let accepted = self
            .follow_link(slice, config, next, &pred_y, &pred_z)
            .or_else(|| self.search_road(slice, config, next, &pred_y, &pred_z));

        match accepted {
            Some((index, chi2)) => {
                let hit = slice.hit(next, index);
                self.fit_y = pred_y;
                self.fit_z = pred_z;
                self.fit_y.update(hit.y, hit.err_y2);
                self.fit_z.update(hit.z, hit.err_z2);
                self.x = x_next;
                self.last_err_y2 = hit.err_y2;
                self.last_err_z2 = hit.err_z2;
                self.chi2 += chi2;
                self.ndf = self.ndf.saturating_add(2);
                self.hits.push(TrackletHit::new(next as u16, index as u32));
                self.n_misses = 0;
            }
            None => self.n_misses += 1,
        }
        self.row = next as u16;
    }

    /// Consensus link of the last hit, if it sits on the previous row and
    /// passes the extension cut.
    fn follow_link(
        &self,
        slice: &SliceData,
        config: &TrackerConfig,
        next: usize,
        pred_y: &LineFit,
        pred_z: &LineFit,
    ) -> Option<(usize, f32)> {
        let last = self.hits.last()?;
        if usize::from(last.row) + 1 != next {
            return None;
        }
        let link = slice.link_up(usize::from(last.row), last.index as usize);
        if link == NO_LINK {
            return None;
        }
        let index = link as usize;
        let hit = slice.hit(next, index);
        let chi2 = pred_y.chi2(hit.y, hit.err_y2) + pred_z.chi2(hit.z, hit.err_z2);
        (chi2 <= config.extend_chi2_cut).then_some((index, chi2))
    }

    /// Best unused hit of row `next` inside the search road around the
    /// prediction.
    ///
    /// Hits holding a consensus backward link belong to another chain and are
    /// skipped; chain origins stay eligible.
    fn search_road(
        &self,
        slice: &SliceData,
        config: &TrackerConfig,
        next: usize,
        pred_y: &LineFit,
        pred_z: &LineFit,
    ) -> Option<(usize, f32)> {
        let road = |c00: f32, err2: f32| {
            (config.road_sigmas * (c00 + err2).sqrt())
                .max(config.min_road)
                .min(config.search_window)
        };
        let half_y = road(pred_y.c00, self.last_err_y2);
        let half_z = road(pred_z.c00, self.last_err_z2);

        let mut best: Option<(f32, u32, usize)> = None;
        for k in slice.row(next).grid.query(pred_y.p, pred_z.p, half_y, half_z) {
            if slice.link_down(next, k) != NO_LINK {
                continue;
            }
            let hit = slice.hit(next, k);
            if (hit.y - pred_y.p).abs() > half_y || (hit.z - pred_z.p).abs() > half_z {
                continue;
            }
            let chi2 = pred_y.chi2(hit.y, hit.err_y2) + pred_z.chi2(hit.z, hit.err_z2);
            if chi2 > config.extend_chi2_cut {
                continue;
            }
            let better = match best {
                None => true,
                Some((c, id, _)) => chi2 < c || (chi2 == c && hit.id < id),
            };
            if better {
                best = Some((chi2, hit.id, k));
            }
        }
        best.map(|(chi2, _, k)| (k, chi2))
    }

    /// Fit parameters at the last accepted hit.
    #[must_use]
    pub fn params(&self) -> TrackParams {
        TrackParams {
            x: self.x,
            y: self.fit_y.p,
            z: self.fit_z.p,
            dy_dx: self.fit_y.t,
            dz_dx: self.fit_z.t,
        }
    }

    /// Converts a terminal state into its outcome.
    #[must_use]
    pub fn finish(self, config: &TrackerConfig) -> TaskOutcome {
        if self.hits.len() < usize::from(config.min_hits) {
            return TaskOutcome::Abandoned;
        }
        let params = self.params();
        TaskOutcome::Finished(Tracklet {
            id: self.id,
            hits: self.hits,
            chi2: self.chi2,
            ndf: self.ndf,
            params,
        })
    }
}

/// Advances a state until it terminates or the next row reaches `block_end`.
#[must_use]
pub fn advance(
    mut state: TrackletState,
    slice: &SliceData,
    config: &TrackerConfig,
    block_end: usize,
) -> TaskOutcome {
    loop {
        if state.is_terminal(slice.n_rows(), config) {
            return state.finish(config);
        }
        if state.row() + 1 >= block_end {
            return TaskOutcome::Paused(state);
        }
        state.step(slice, config);
    }
}

/// Runs one task inside the row block ending at `block_end`.
#[must_use]
pub fn run_task(
    task: TrackletTask,
    id: u32,
    slice: &SliceData,
    config: &TrackerConfig,
    block_end: usize,
) -> TaskOutcome {
    let state = match task {
        TrackletTask::Fresh(start) => TrackletState::seed(slice, id, start),
        TrackletTask::Paused(state) => state,
    };
    advance(state, slice, config, block_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::neighbours::{clean_neighbours, find_neighbours};
    use crate::start_hits::{find_start_hits, sort_start_hits};
    use catrack_core::{Hit, SliceGeometry, SliceInput};

    fn prepared(hits: Vec<Hit>, n_rows: usize, config: &TrackerConfig) -> (SliceData, Vec<StartHit>) {
        let input = SliceInput::new(0, SliceGeometry::uniform(n_rows, 80.0, 1.0), hits);
        let mut slice = SliceData::build(&input, false).expect("valid slice");
        find_neighbours(&mut slice, config, false).expect("finder");
        clean_neighbours(&mut slice, false).expect("cleaner");
        let starts = sort_start_hits(&find_start_hits(&slice, false), 1024, false).expect("fits");
        (slice, starts)
    }

    fn line_hit(id: u32, row: u16) -> Hit {
        let x = 80.0 + f32::from(row);
        Hit::new(id, row, 0.1 * x, 0.02 * x)
    }

    #[test]
    fn test_follows_chain_to_last_row() {
        let config = TrackerConfig::default();
        let hits = (0..6).map(|r| line_hit(u32::from(r), r)).collect();
        let (slice, starts) = prepared(hits, 6, &config);
        assert_eq!(starts, vec![StartHit::new(0, 0)]);

        let outcome = run_task(TrackletTask::Fresh(starts[0]), 0, &slice, &config, 6);
        let TaskOutcome::Finished(tracklet) = outcome else {
            panic!("expected a finished tracklet, got {outcome:?}");
        };
        let rows: Vec<u16> = tracklet.hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(tracklet.ndf, 10);
        assert!(tracklet.chi2 < 1.0);
        assert!((tracklet.params.dy_dx - 0.1).abs() < 1e-3);
    }

    #[test]
    fn test_road_bridges_missing_row() {
        let config = TrackerConfig::default();
        let hits = [0u16, 1, 3, 4].iter().map(|&r| line_hit(u32::from(r), r)).collect();
        let (slice, starts) = prepared(hits, 5, &config);
        assert_eq!(starts.len(), 2);

        let outcome = run_task(TrackletTask::Fresh(starts[0]), 0, &slice, &config, 5);
        let TaskOutcome::Finished(tracklet) = outcome else {
            panic!("expected a finished tracklet, got {outcome:?}");
        };
        let rows: Vec<u16> = tracklet.hits.iter().map(|h| h.row).collect();
        assert_eq!(rows, vec![0, 1, 3, 4]);

        // The second start hit only reaches two hits.
        let short = run_task(TrackletTask::Fresh(starts[1]), 1, &slice, &config, 5);
        assert_eq!(short, TaskOutcome::Abandoned);
    }

    #[test]
    fn test_pause_and_resume_matches_single_run() {
        let config = TrackerConfig::default();
        let hits = (0..8).map(|r| line_hit(u32::from(r), r)).collect();
        let (slice, starts) = prepared(hits, 8, &config);

        let whole = run_task(TrackletTask::Fresh(starts[0]), 0, &slice, &config, 8);

        let mut outcome = run_task(TrackletTask::Fresh(starts[0]), 0, &slice, &config, 3);
        let mut block_end = 3;
        while let TaskOutcome::Paused(state) = outcome {
            assert_eq!(state.row() + 1, block_end);
            block_end += 3;
            outcome = run_task(TrackletTask::Paused(state), 0, &slice, &config, block_end.min(8));
        }
        assert_eq!(outcome, whole);
    }

    #[test]
    fn test_road_skips_hits_of_another_chain() {
        // Chain A misses row 3; chain B runs parallel to it on every row.
        let config = TrackerConfig::default();
        let mut hits: Vec<Hit> = [0u16, 1, 2, 4, 5]
            .iter()
            .map(|&r| line_hit(u32::from(r), r))
            .collect();
        hits.extend((0..6u16).map(|r| {
            let x = 80.0 + f32::from(r);
            Hit::new(100 + u32::from(r), r, 0.1 * x + 0.15, 0.02 * x)
        }));
        let (slice, starts) = prepared(hits, 6, &config);

        let a = starts
            .iter()
            .position(|s| s.row == 0 && slice.hit(0, s.index as usize).id == 0)
            .expect("chain A starts on row 0");
        let outcome = run_task(TrackletTask::Fresh(starts[a]), 0, &slice, &config, 6);
        let TaskOutcome::Finished(tracklet) = outcome else {
            panic!("expected a finished tracklet, got {outcome:?}");
        };
        let ids: Vec<u32> = tracklet
            .hits
            .iter()
            .map(|h| slice.hit(usize::from(h.row), h.index as usize).id)
            .collect();
        assert_eq!(ids, vec![0, 1, 2, 4, 5]);
    }

    #[test]
    fn test_too_many_misses_terminates() {
        let config = TrackerConfig::default().with_max_misses(0).with_min_hits(2);
        let hits = [0u16, 1, 3].iter().map(|&r| line_hit(u32::from(r), r)).collect();
        let (slice, starts) = prepared(hits, 4, &config);

        let mut state = TrackletState::seed(&slice, 0, starts[0]);
        state.step(&slice, &config);
        state.step(&slice, &config);
        assert_eq!(state.n_misses(), 1);
        assert!(state.is_terminal(slice.n_rows(), &config));
        let TaskOutcome::Finished(tracklet) = state.finish(&config) else {
            panic!("two hits satisfy min_hits = 2");
        };
        assert_eq!(tracklet.len(), 2);
    }
}
