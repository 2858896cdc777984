//! Accelerator backend interface and a host-side lockstep emulator.
//!
//! [`LockstepBackend`] runs the same per-hit and per-tracklet kernels as the
//! CPU pipeline, but schedules them the way a SIMT device would: kernels are
//! launched over blocks of `lanes_per_block` lanes, and tracklet
//! construction advances every lane of a block by one row per step, refilling
//! idle lanes from the row block's task counter between steps.

use catrack_core::{BackendError, SliceInput, Track, TrackerConfig};

use crate::constructor::{TaskOutcome, TrackletState, TrackletTask};
use crate::neighbours::{clean_hit_links, find_hit_links};
use crate::scheduler::{block_queue, lock, row_blocks, task_arena, Construction};
use crate::selector::{collect_selection, mark_tracklet, resolve_tracklet};
use crate::slice::SliceData;
use crate::start_hits::{find_row_start_hits, sort_start_hits, StartHit};

/// An alternative executor for one slice.
///
/// Any error makes the tracker fall back to the CPU pipeline for that slice.
pub trait ReconstructionBackend: Send + Sync {
    /// Short name recorded in the slice statistics.
    fn name(&self) -> &'static str;

    /// Returns true if the backend can currently accept work.
    fn is_available(&self) -> bool;

    /// Reconstructs one slice.
    ///
    /// # Errors
    /// Returns a [`BackendError`] on any failure.
    fn reconstruct(
        &self,
        input: &SliceInput,
        config: &TrackerConfig,
    ) -> std::result::Result<Vec<Track>, BackendError>;
}

/// Default number of lanes per emulated block.
pub const DEFAULT_LANES_PER_BLOCK: usize = 32;

/// Single-threaded emulation of a lockstep (SIMT) device.
#[derive(Debug, Clone)]
pub struct LockstepBackend {
    lanes_per_block: usize,
    available: bool,
}

impl Default for LockstepBackend {
    fn default() -> Self {
        Self::new(DEFAULT_LANES_PER_BLOCK)
    }
}

impl LockstepBackend {
    /// Creates an available emulator.
    #[must_use]
    pub fn new(lanes_per_block: usize) -> Self {
        Self {
            lanes_per_block,
            available: true,
        }
    }

    /// Sets whether the emulator reports itself available.
    #[must_use]
    pub fn with_availability(mut self, available: bool) -> Self {
        self.available = available;
        self
    }

    /// Lanes per emulated block.
    #[must_use]
    pub fn lanes_per_block(&self) -> usize {
        self.lanes_per_block
    }

    /// Launches `kernel` for `n` items, one lane per item, block by block.
    fn launch<T, F>(&self, n: usize, mut kernel: F) -> Vec<T>
    where
        F: FnMut(usize) -> T,
    {
        let mut out = Vec::with_capacity(n);
        for block_start in (0..n).step_by(self.lanes_per_block) {
            let block_end = (block_start + self.lanes_per_block).min(n);
            out.extend((block_start..block_end).map(&mut kernel));
        }
        out
    }

    fn link_pass<F>(&self, slice: &mut SliceData, kernel: F) -> Result<(), BackendError>
    where
        F: Fn(&SliceData, usize, usize) -> (i32, i32),
    {
        let view: &SliceData = slice;
        let mut up = Vec::with_capacity(view.n_hits());
        let mut down = Vec::with_capacity(view.n_hits());
        for r in 0..view.n_rows() {
            for (u, d) in self.launch(view.row(r).n_hits, |i| kernel(view, r, i)) {
                up.push(u);
                down.push(d);
            }
        }
        slice.set_links(up, down)?;
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn construct(
        &self,
        slice: &SliceData,
        starts: &[StartHit],
        config: &TrackerConfig,
    ) -> Result<Construction, BackendError> {
        let arena = task_arena(starts);
        let mut construction = Construction::default();
        let mut carried = Vec::new();
        let mut fresh = 0;

        for block in &row_blocks(slice.n_rows(), config.row_block_size) {
            let queue = block_queue(block, starts, &mut fresh, carried);
            block.reset(queue.len());

            let mut lanes: Vec<Option<(usize, TrackletState)>> = vec![None; self.lanes_per_block];
            let mut outcomes = Vec::new();
            loop {
                // Refill idle lanes.
                for lane in lanes.iter_mut().filter(|lane| lane.is_none()) {
                    let Some(claimed) = block.claim(1) else {
                        break;
                    };
                    let id = queue[claimed.start];
                    let state = match lock(&arena[id]).take() {
                        Some(TrackletTask::Fresh(start)) => {
                            TrackletState::seed(slice, id as u32, start)
                        }
                        Some(TrackletTask::Paused(state)) => state,
                        None => continue,
                    };
                    *lane = Some((id, state));
                }
                if lanes.iter().all(Option::is_none) {
                    break;
                }

                // Retire lanes that are done with this block, step the rest.
                for lane in &mut lanes {
                    let Some((id, state)) = lane.take() else {
                        continue;
                    };
                    if state.is_terminal(slice.n_rows(), config) {
                        outcomes.push((id, state.finish(config)));
                    } else if state.row() + 1 >= block.end_row {
                        outcomes.push((id, TaskOutcome::Paused(state)));
                    } else {
                        let mut state = state;
                        state.step(slice, config);
                        *lane = Some((id, state));
                    }
                }
            }
            carried = construction.absorb(&arena, outcomes);
        }
        Ok(construction.finish(&arena, config)?)
    }
}

impl ReconstructionBackend for LockstepBackend {
    fn name(&self) -> &'static str {
        "lockstep"
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn reconstruct(
        &self,
        input: &SliceInput,
        config: &TrackerConfig,
    ) -> std::result::Result<Vec<Track>, BackendError> {
        if !self.available {
            return Err(BackendError::Unavailable("lockstep emulator disabled".into()));
        }
        if self.lanes_per_block == 0 {
            return Err(BackendError::Failed("zero lanes per block".into()));
        }
        config.validate()?;

        let mut slice = SliceData::build(input, false)?;
        self.link_pass(&mut slice, |s, r, i| find_hit_links(s, config, r, i))?;
        self.link_pass(&mut slice, clean_hit_links)?;

        let per_row = self.launch(slice.n_rows(), |r| find_row_start_hits(&slice, r));
        let starts = sort_start_hits(&per_row, config.max_start_hits, false)?;
        let construction = self.construct(&slice, &starts, config)?;

        slice.reset_weights();
        let min_hits = usize::from(config.min_hits);
        let tracklets = &construction.tracklets;
        self.launch(tracklets.len(), |t| mark_tracklet(&slice, &tracklets[t], min_hits));
        let resolved = self.launch(tracklets.len(), |t| {
            let tracklet = &tracklets[t];
            let (track, dropped) = resolve_tracklet(&slice, tracklet, min_hits);
            (tracklet.id, track, dropped)
        });
        Ok(collect_selection(resolved).tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use catrack_core::{Hit, SliceGeometry};

    fn line_slice() -> SliceInput {
        let hits = (0..6u16)
            .map(|r| {
                let x = 80.0 + f32::from(r);
                Hit::new(u32::from(r), r, 0.05 * x, 0.02 * x)
            })
            .collect();
        SliceInput::new(0, SliceGeometry::uniform(6, 80.0, 1.0), hits)
    }

    #[test]
    fn test_reconstructs_line() {
        let backend = LockstepBackend::new(4);
        let tracks = backend
            .reconstruct(&line_slice(), &TrackerConfig::default().with_row_block_size(2))
            .expect("lockstep run");
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].hit_ids().collect::<Vec<_>>(), vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_unavailable_backend_errors() {
        let backend = LockstepBackend::default().with_availability(false);
        assert!(!backend.is_available());
        let err = backend
            .reconstruct(&line_slice(), &TrackerConfig::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Unavailable(_)));
    }

    #[test]
    fn test_zero_lanes_fails() {
        let err = LockstepBackend::new(0)
            .reconstruct(&line_slice(), &TrackerConfig::default())
            .unwrap_err();
        assert!(matches!(err, BackendError::Failed(_)));
    }

    #[test]
    fn test_launch_preserves_order() {
        let backend = LockstepBackend::new(3);
        let out = backend.launch(8, |i| i * 2);
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10, 12, 14]);
    }
}
