//! Slice and event reconstruction front end.

use std::time::Instant;

use catrack_core::{
    Error, EventStatistics, ExecutionMode, Result, SliceInput, SliceOutput, SliceStatistics,
    StageTimings, TrackerConfig,
};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::backend::ReconstructionBackend;
use crate::neighbours::{clean_neighbours, find_neighbours};
use crate::scheduler::construct_tracklets;
use crate::selector::select_tracks;
use crate::slice::SliceData;
use crate::start_hits::{find_start_hits, sort_start_hits};

/// Runs the CPU pipeline on one slice.
///
/// Stages run on the current rayon pool when `config.execution` is
/// parallel, inline otherwise.
///
/// # Errors
/// Returns a data, capacity or construction error; the slice produces no
/// tracks in that case.
pub fn reconstruct_cpu(input: &SliceInput, config: &TrackerConfig) -> Result<SliceOutput> {
    let parallel = config.execution.is_parallel();
    let mut timings = StageTimings::default();
    let mut stats = SliceStatistics {
        hits: input.len(),
        ..SliceStatistics::default()
    };

    let start = Instant::now();
    let mut slice = SliceData::build(input, parallel)?;
    timings.grid = start.elapsed();

    let start = Instant::now();
    stats.raw_links = find_neighbours(&mut slice, config, parallel)?;
    timings.neighbours = start.elapsed();

    let start = Instant::now();
    stats.consensus_links = clean_neighbours(&mut slice, parallel)?;
    timings.cleaner = start.elapsed();

    let start = Instant::now();
    let starts = sort_start_hits(
        &find_start_hits(&slice, parallel),
        config.max_start_hits,
        parallel,
    )?;
    stats.start_hits = starts.len();
    timings.start_hits = start.elapsed();

    let start = Instant::now();
    let construction = construct_tracklets(&slice, &starts, config, parallel)?;
    stats.tracklets = construction.tracklets.len();
    stats.abandoned = construction.abandoned;
    stats.checkpoints = construction.checkpoints;
    timings.construction = start.elapsed();

    let start = Instant::now();
    let selection = select_tracks(&mut slice, &construction.tracklets, config, parallel);
    stats.tracks = selection.tracks.len();
    stats.rejected_tracklets = selection.rejected;
    stats.dropped_hits = selection.dropped_hits;
    timings.selection = start.elapsed();

    stats.timings = timings;
    log::debug!(
        "slice {}: {} hits, {} consensus links, {} start hits, {} tracklets, {} tracks in {:?}",
        input.slice,
        stats.hits,
        stats.consensus_links,
        stats.start_hits,
        stats.tracklets,
        stats.tracks,
        timings.total()
    );

    Ok(SliceOutput {
        slice: input.slice,
        tracks: selection.tracks,
        statistics: stats,
    })
}

/// Reconstruction front end: owns the configuration, the worker pool and an
/// optional accelerator backend.
pub struct Tracker {
    config: TrackerConfig,
    pool: Option<ThreadPool>,
    backend: Option<Box<dyn ReconstructionBackend>>,
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("config", &self.config)
            .field("pool_threads", &self.pool.as_ref().map(ThreadPool::current_num_threads))
            .field("backend", &self.backend_name())
            .finish()
    }
}

impl Tracker {
    /// Creates a tracker.
    ///
    /// A dedicated pool is built for `ExecutionMode::Parallel` with a non-zero
    /// worker count; zero workers use the global rayon pool.
    ///
    /// # Errors
    /// Returns a configuration error for invalid parameters or if the pool
    /// cannot be built.
    pub fn new(config: TrackerConfig) -> Result<Self> {
        config.validate()?;
        let pool = match config.execution {
            ExecutionMode::Parallel { workers } if workers > 0 => Some(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("catrack-worker-{i}"))
                    .build()
                    .map_err(|e| Error::ConfigError(format!("cannot build thread pool: {e}")))?,
            ),
            _ => None,
        };
        Ok(Self {
            config,
            pool,
            backend: None,
        })
    }

    /// Attaches an accelerator backend.
    #[must_use]
    pub fn with_backend(mut self, backend: Box<dyn ReconstructionBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Name of the attached backend.
    #[must_use]
    pub fn backend_name(&self) -> Option<&'static str> {
        self.backend.as_ref().map(|b| b.name())
    }

    fn install<R, F>(&self, f: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }

    /// Reconstructs one slice.
    ///
    /// The backend, if attached and available, is tried first; on any
    /// backend error the slice runs on the CPU path.
    ///
    /// # Errors
    /// Returns the CPU pipeline's error for this slice.
    pub fn reconstruct_slice(&self, input: &SliceInput) -> Result<SliceOutput> {
        let mut fell_back = false;
        if let Some(backend) = &self.backend {
            if backend.is_available() {
                match backend.reconstruct(input, &self.config) {
                    Ok(tracks) => {
                        let statistics = SliceStatistics {
                            hits: input.len(),
                            tracks: tracks.len(),
                            backend: Some(backend.name()),
                            ..SliceStatistics::default()
                        };
                        return Ok(SliceOutput {
                            slice: input.slice,
                            tracks,
                            statistics,
                        });
                    }
                    Err(err) => {
                        log::warn!(
                            "slice {}: backend {} failed, falling back to CPU: {err}",
                            input.slice,
                            backend.name()
                        );
                    }
                }
            } else {
                log::warn!(
                    "slice {}: backend {} unavailable, falling back to CPU",
                    input.slice,
                    backend.name()
                );
            }
            fell_back = true;
        }

        let mut output = self.install(|| reconstruct_cpu(input, &self.config))?;
        output.statistics.fell_back = fell_back;
        Ok(output)
    }

    /// Reconstructs every slice of an event.
    ///
    /// Results are returned per slice in input order; a failing slice does
    /// not affect the others.
    pub fn reconstruct_event(&self, slices: &[SliceInput]) -> Vec<Result<SliceOutput>> {
        let concurrent = self.config.parallel_slices && self.config.execution.is_parallel();
        let results: Vec<Result<SliceOutput>> = if concurrent {
            self.install(|| {
                slices
                    .par_iter()
                    .map(|slice| self.reconstruct_slice(slice))
                    .collect()
            })
        } else {
            slices.iter().map(|slice| self.reconstruct_slice(slice)).collect()
        };

        let summary = summarize(&results);
        log::info!(
            "reconstructed {} slices ({} failed, {} fallbacks): {} hits, {} tracks",
            summary.slices,
            summary.failed_slices,
            summary.fallbacks,
            summary.hits,
            summary.tracks
        );
        results
    }
}

/// Aggregates per-slice results.
#[must_use]
pub fn summarize(results: &[Result<SliceOutput>]) -> EventStatistics {
    let mut stats = EventStatistics::default();
    for result in results {
        match result {
            Ok(output) => stats.add_slice(&output.statistics),
            Err(_) => stats.add_failure(),
        }
    }
    stats
}
