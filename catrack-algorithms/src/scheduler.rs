//! Row-block work scheduler for tracklet construction.
//!
//! Rows are cut into blocks of `row_block_size`. Blocks run in row order;
//! inside a block, workers claim batches of tasks from an atomic counter
//! until the block's queue is drained. Tasks that reach the end of the block
//! are checkpointed into the task arena and queued again for the next block.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use catrack_core::{Error, Result, ScratchArray, TrackerConfig, Tracklet};
use rayon::prelude::*;

use crate::constructor::{run_task, TaskOutcome, TrackletTask};
use crate::slice::SliceData;
use crate::start_hits::StartHit;

/// A contiguous range of rows with its task counters.
#[derive(Debug)]
pub struct RowBlock {
    /// First row of the block.
    pub first_row: usize,
    /// One past the last row of the block.
    pub end_row: usize,
    next_task: AtomicUsize,
    n_tasks: AtomicUsize,
}

impl RowBlock {
    /// Creates a block with empty counters.
    #[must_use]
    pub fn new(first_row: usize, end_row: usize) -> Self {
        Self {
            first_row,
            end_row,
            next_task: AtomicUsize::new(0),
            n_tasks: AtomicUsize::new(0),
        }
    }

    /// Publishes a queue of `n_tasks` tasks.
    pub fn reset(&self, n_tasks: usize) {
        self.next_task.store(0, Ordering::Release);
        self.n_tasks.store(n_tasks, Ordering::Release);
    }

    /// Claims the next batch of queue positions.
    pub fn claim(&self, batch: usize) -> Option<Range<usize>> {
        let n_tasks = self.n_tasks.load(Ordering::Acquire);
        let start = self.next_task.fetch_add(batch, Ordering::AcqRel);
        (start < n_tasks).then(|| start..(start + batch).min(n_tasks))
    }

    /// Returns true if `row` lies in the block.
    #[inline]
    #[must_use]
    pub fn contains(&self, row: usize) -> bool {
        (self.first_row..self.end_row).contains(&row)
    }
}

/// Partitions `n_rows` rows into blocks of `block_size`.
#[must_use]
pub fn row_blocks(n_rows: usize, block_size: usize) -> Vec<RowBlock> {
    let block_size = block_size.max(1);
    (0..n_rows)
        .step_by(block_size)
        .map(|first| RowBlock::new(first, (first + block_size).min(n_rows)))
        .collect()
}

/// Task arena indexed by tracklet id.
pub type TaskArena = Vec<Mutex<Option<TrackletTask>>>;

/// Creates the arena with one fresh task per start hit.
#[must_use]
pub fn task_arena(starts: &[StartHit]) -> TaskArena {
    starts
        .iter()
        .map(|&start| Mutex::new(Some(TrackletTask::Fresh(start))))
        .collect()
}

/// Locks an arena slot. Slots are only ever replaced wholesale, so a
/// poisoned lock still holds a consistent value.
pub fn lock<T>(slot: &Mutex<T>) -> MutexGuard<'_, T> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Number of arena slots still holding a task.
#[must_use]
pub fn pending_tasks(arena: &TaskArena) -> usize {
    arena.iter().filter(|slot| lock(slot).is_some()).count()
}

/// Output of the construction stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Construction {
    /// Finished tracklets ordered by id.
    pub tracklets: Vec<Tracklet>,
    /// Tasks terminated below the minimum length.
    pub abandoned: usize,
    /// Number of times a task was paused at a block boundary.
    pub checkpoints: usize,
}

impl Construction {
    /// Records the outcomes of one block, sorted by tracklet id.
    ///
    /// Paused states go back into the arena and their ids are returned as
    /// the carry-over queue of the next block.
    pub fn absorb(&mut self, arena: &TaskArena, mut outcomes: Vec<(usize, TaskOutcome)>) -> Vec<usize> {
        outcomes.sort_unstable_by_key(|(id, _)| *id);
        let mut carried = Vec::new();
        for (id, outcome) in outcomes {
            match outcome {
                TaskOutcome::Finished(tracklet) => self.tracklets.push(tracklet),
                TaskOutcome::Abandoned => self.abandoned += 1,
                TaskOutcome::Paused(state) => {
                    *lock(&arena[id]) = Some(TrackletTask::Paused(state));
                    self.checkpoints += 1;
                    carried.push(id);
                }
            }
        }
        carried
    }

    /// Validates the finished run.
    ///
    /// # Errors
    /// Returns [`Error::IncompleteConstruction`] if tasks remain in the
    /// arena and [`Error::CapacityExceeded`] if there are more tracklets
    /// than `config.max_tracklets`.
    pub fn finish(mut self, arena: &TaskArena, config: &TrackerConfig) -> Result<Self> {
        let pending = pending_tasks(arena);
        if pending > 0 {
            return Err(Error::IncompleteConstruction { pending });
        }
        if self.tracklets.len() > config.max_tracklets {
            return Err(Error::CapacityExceeded {
                array: ScratchArray::Tracklets,
                required: self.tracklets.len(),
                capacity: config.max_tracklets,
            });
        }
        self.tracklets.sort_unstable_by_key(|t| t.id);
        Ok(self)
    }
}

/// Builds the queue of one block: carried-over ids, then the fresh ids
/// whose start row lies in the block. Advances `fresh` past them.
#[must_use]
pub fn block_queue(
    block: &RowBlock,
    starts: &[StartHit],
    fresh: &mut usize,
    carried: Vec<usize>,
) -> Vec<usize> {
    let end = *fresh + starts[*fresh..].partition_point(|s| usize::from(s.row) < block.end_row);
    let mut queue = carried;
    queue.extend(*fresh..end);
    *fresh = end;
    queue
}

/// Runs every start hit through the row-block scheduler.
///
/// In parallel mode one claim loop runs per thread of the current rayon
/// pool; otherwise a single loop runs inline.
///
/// # Errors
/// Returns a capacity error or an incomplete-construction error.
#[allow(clippy::cast_possible_truncation)]
pub fn construct_tracklets(
    slice: &SliceData,
    starts: &[StartHit],
    config: &TrackerConfig,
    parallel: bool,
) -> Result<Construction> {
    let arena = task_arena(starts);
    let blocks = row_blocks(slice.n_rows(), config.row_block_size);
    let batch = config.task_batch_size.max(1);
    let workers = if parallel { rayon::current_num_threads() } else { 1 };

    let mut construction = Construction::default();
    let mut carried = Vec::new();
    let mut fresh = 0;

    for block in &blocks {
        let queue = block_queue(block, starts, &mut fresh, carried);
        if queue.is_empty() {
            carried = Vec::new();
            continue;
        }
        block.reset(queue.len());
        log::trace!(
            "slice {}: rows {}..{} with {} tasks",
            slice.slice(),
            block.first_row,
            block.end_row,
            queue.len()
        );

        let worker = |_: usize| {
            let mut outcomes = Vec::new();
            while let Some(range) = block.claim(batch) {
                for &id in &queue[range] {
                    let task = lock(&arena[id]).take();
                    if let Some(task) = task {
                        let outcome = run_task(task, id as u32, slice, config, block.end_row);
                        outcomes.push((id, outcome));
                    }
                }
            }
            outcomes
        };

        let outcomes: Vec<(usize, TaskOutcome)> = if parallel {
            (0..workers).into_par_iter().flat_map_iter(worker).collect()
        } else {
            worker(0)
        };
        carried = construction.absorb(&arena, outcomes);
    }

    construction.finish(&arena, config)
}
