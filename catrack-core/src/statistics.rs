//! Reconstruction statistics.

use std::time::Duration;

use serde::Serialize;

/// Wall-clock time spent in each pipeline stage of one slice.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StageTimings {
    /// Arena and grid construction.
    pub grid: Duration,
    /// Neighbours finder.
    pub neighbours: Duration,
    /// Neighbours cleaner.
    pub cleaner: Duration,
    /// Start-hit finding and sorting.
    pub start_hits: Duration,
    /// Tracklet construction.
    pub construction: Duration,
    /// Tracklet selection.
    pub selection: Duration,
}

impl StageTimings {
    /// Sum over all stages.
    #[must_use]
    pub fn total(&self) -> Duration {
        self.grid
            + self.neighbours
            + self.cleaner
            + self.start_hits
            + self.construction
            + self.selection
    }

    fn accumulate(&mut self, other: &Self) {
        self.grid += other.grid;
        self.neighbours += other.neighbours;
        self.cleaner += other.cleaner;
        self.start_hits += other.start_hits;
        self.construction += other.construction;
        self.selection += other.selection;
    }
}

/// Counters collected while reconstructing one slice.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SliceStatistics {
    /// Input hits.
    pub hits: usize,
    /// Forward links set by the neighbours finder.
    pub raw_links: usize,
    /// Forward links surviving the consensus cleaner.
    pub consensus_links: usize,
    /// Start hits.
    pub start_hits: usize,
    /// Finished tracklets.
    pub tracklets: usize,
    /// Tasks abandoned below the minimum length.
    pub abandoned: usize,
    /// Task checkpoints taken at row-block boundaries.
    pub checkpoints: usize,
    /// Accepted tracks.
    pub tracks: usize,
    /// Tracklets rejected during hit arbitration.
    pub rejected_tracklets: usize,
    /// Hits dropped by tracklets that lost an ownership claim.
    pub dropped_hits: usize,
    /// Name of the backend that produced the tracks, if not the CPU path.
    pub backend: Option<&'static str>,
    /// True if a configured backend failed or was unavailable.
    pub fell_back: bool,
    /// Per-stage timings (CPU path only).
    pub timings: StageTimings,
}

/// Aggregate over all successfully reconstructed slices of an event.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStatistics {
    /// Slices reconstructed successfully.
    pub slices: usize,
    /// Slices that failed.
    pub failed_slices: usize,
    /// Slices that fell back from the backend to the CPU path.
    pub fallbacks: usize,
    /// Input hits.
    pub hits: usize,
    /// Start hits.
    pub start_hits: usize,
    /// Finished tracklets.
    pub tracklets: usize,
    /// Accepted tracks.
    pub tracks: usize,
    /// Summed stage timings.
    pub timings: StageTimings,
}

impl EventStatistics {
    /// Adds one successful slice.
    pub fn add_slice(&mut self, slice: &SliceStatistics) {
        self.slices += 1;
        if slice.fell_back {
            self.fallbacks += 1;
        }
        self.hits += slice.hits;
        self.start_hits += slice.start_hits;
        self.tracklets += slice.tracklets;
        self.tracks += slice.tracks;
        self.timings.accumulate(&slice.timings);
    }

    /// Records one failed slice.
    pub fn add_failure(&mut self) {
        self.failed_slices += 1;
    }
}
