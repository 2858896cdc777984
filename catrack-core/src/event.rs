//! Slice and event input/output containers.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::hit::{Hit, SliceGeometry};
use crate::statistics::SliceStatistics;
use crate::track::Track;

/// All hits of one detector slice plus its row layout.
///
/// The pipeline treats this as read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceInput {
    /// Slice number.
    pub slice: u32,
    /// Row layout.
    pub geometry: SliceGeometry,
    /// Unordered hits.
    pub hits: Vec<Hit>,
}

impl SliceInput {
    /// Creates a slice input.
    #[must_use]
    pub fn new(slice: u32, geometry: SliceGeometry, hits: Vec<Hit>) -> Self {
        Self {
            slice,
            geometry,
            hits,
        }
    }

    /// Number of hits.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Returns true if the slice has no hits.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// A collection of slices reconstructed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInput {
    /// Slices of the event.
    pub slices: Vec<SliceInput>,
}

impl EventInput {
    /// Total number of hits over all slices.
    #[must_use]
    pub fn total_hits(&self) -> usize {
        self.slices.iter().map(SliceInput::len).sum()
    }

    /// Load an event from a JSON file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// Load an event from a JSON string.
    ///
    /// # Errors
    /// Returns an error if the string cannot be parsed.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Tracks of one slice.
#[derive(Debug, Clone, Serialize)]
pub struct SliceOutput {
    /// Slice number.
    pub slice: u32,
    /// Accepted tracks ordered by first-hit row.
    pub tracks: Vec<Track>,
    /// Counters and timings.
    pub statistics: SliceStatistics,
}
