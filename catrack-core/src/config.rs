//! Tracker configuration.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How the CPU path maps work onto threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Every stage and the scheduler run inline on the calling thread.
    Sequential,
    /// Stages use rayon; the scheduler runs `workers` claim loops
    /// (`0` = rayon default thread count).
    Parallel { workers: usize },
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Parallel { workers: 0 }
    }
}

impl ExecutionMode {
    /// Returns true for the parallel mapping.
    #[inline]
    #[must_use]
    pub fn is_parallel(&self) -> bool {
        matches!(self, Self::Parallel { .. })
    }
}

/// Configuration for slice reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Half-width (cm) of the grid window used when searching the adjacent
    /// row for link candidates; also the upper bound of the search road.
    pub search_window: f32,
    /// Chi-square cutoff for accepting a hit-to-hit link.
    pub link_chi2_cut: f32,
    /// Chi-square cutoff for accepting a hit during tracklet extension.
    pub extend_chi2_cut: f32,
    /// Maximum number of consecutive rows without a matching hit.
    pub max_misses: u16,
    /// Minimum number of hits for an accepted track.
    pub min_hits: u16,
    /// Number of rows per scheduling block.
    pub row_block_size: usize,
    /// Search-road half-width in standard deviations of the prediction.
    pub road_sigmas: f32,
    /// Lower bound (cm) of the search-road half-width.
    pub min_road: f32,
    /// Tasks claimed per scheduler fetch.
    pub task_batch_size: usize,
    /// Capacity of the compacted start-hit array.
    pub max_start_hits: usize,
    /// Capacity of the finished-tracklet array.
    pub max_tracklets: usize,
    /// Thread mapping of the CPU path.
    pub execution: ExecutionMode,
    /// Process independent slices concurrently.
    pub parallel_slices: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            search_window: 2.0,
            link_chi2_cut: 50.0,
            extend_chi2_cut: 16.0,
            max_misses: 2,
            min_hits: 3,
            row_block_size: 16,
            road_sigmas: 3.0,
            min_road: 0.2,
            task_batch_size: 4,
            max_start_hits: 1 << 20,
            max_tracklets: 1 << 20,
            execution: ExecutionMode::default(),
            parallel_slices: true,
        }
    }
}

impl TrackerConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the row search-window half-width.
    #[must_use]
    pub fn with_search_window(mut self, window: f32) -> Self {
        self.search_window = window;
        self
    }

    /// Sets the link chi-square cutoff.
    #[must_use]
    pub fn with_link_chi2_cut(mut self, cut: f32) -> Self {
        self.link_chi2_cut = cut;
        self
    }

    /// Sets the extension chi-square cutoff.
    #[must_use]
    pub fn with_extend_chi2_cut(mut self, cut: f32) -> Self {
        self.extend_chi2_cut = cut;
        self
    }

    /// Sets the maximum consecutive-miss count.
    #[must_use]
    pub fn with_max_misses(mut self, misses: u16) -> Self {
        self.max_misses = misses;
        self
    }

    /// Sets the minimum hits per track.
    #[must_use]
    pub fn with_min_hits(mut self, hits: u16) -> Self {
        self.min_hits = hits;
        self
    }

    /// Sets the row-block size.
    #[must_use]
    pub fn with_row_block_size(mut self, rows: usize) -> Self {
        self.row_block_size = rows;
        self
    }

    /// Sets the number of tasks claimed per scheduler fetch.
    #[must_use]
    pub fn with_task_batch_size(mut self, tasks: usize) -> Self {
        self.task_batch_size = tasks;
        self
    }

    /// Sets the scratch capacities.
    #[must_use]
    pub fn with_capacities(mut self, start_hits: usize, tracklets: usize) -> Self {
        self.max_start_hits = start_hits;
        self.max_tracklets = tracklets;
        self
    }

    /// Sets the execution mode.
    #[must_use]
    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.execution = execution;
        self
    }

    /// Enables or disables slice-level parallelism.
    #[must_use]
    pub fn with_parallel_slices(mut self, parallel: bool) -> Self {
        self.parallel_slices = parallel;
        self
    }

    /// Checks that every parameter is usable.
    ///
    /// # Errors
    /// Returns [`Error::ConfigError`] naming the first offending parameter.
    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("search_window", self.search_window),
            ("link_chi2_cut", self.link_chi2_cut),
            ("extend_chi2_cut", self.extend_chi2_cut),
            ("road_sigmas", self.road_sigmas),
            ("min_road", self.min_road),
        ];
        for (name, value) in positive {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::ConfigError(format!(
                    "{name} must be finite and positive, got {value}"
                )));
            }
        }
        if self.min_road > self.search_window {
            return Err(Error::ConfigError(format!(
                "min_road ({}) exceeds search_window ({})",
                self.min_road, self.search_window
            )));
        }
        if self.min_hits < 2 {
            return Err(Error::ConfigError(format!(
                "min_hits must be at least 2, got {}",
                self.min_hits
            )));
        }
        if self.row_block_size == 0 {
            return Err(Error::ConfigError("row_block_size must be non-zero".into()));
        }
        if self.task_batch_size == 0 {
            return Err(Error::ConfigError("task_batch_size must be non-zero".into()));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed or validated.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}
