//! Error types for catrack-core.

use std::fmt;

use thiserror::Error;

/// Result type alias for catrack operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Per-slice scratch arrays with a fixed capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScratchArray {
    /// Compacted start-hit array produced by the start-hit sorter.
    StartHits,
    /// Finished tracklets produced by the constructor.
    Tracklets,
}

impl fmt::Display for ScratchArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StartHits => f.write_str("start hits"),
            Self::Tracklets => f.write_str("tracklets"),
        }
    }
}

/// Core error types for slice reconstruction.
///
/// Data and capacity errors are fatal for the slice that raised them; the
/// framework reports them per slice and carries on with the others.
#[derive(Error, Debug)]
pub enum Error {
    /// Hit refers to a row outside the slice geometry.
    #[error("hit {hit} refers to row {row}, but the slice has {n_rows} rows")]
    InvalidRow { hit: u32, row: u16, n_rows: usize },

    /// Hit carries unusable coordinates or errors, or reuses an id.
    #[error("invalid hit {hit}: {reason}")]
    InvalidHit { hit: u32, reason: &'static str },

    /// Slice geometry is unusable.
    #[error("invalid slice geometry: {0}")]
    InvalidGeometry(String),

    /// Link slot points outside the adjacent row.
    #[error("link {link} of hit {hit} in row {row} is out of range")]
    LinkOutOfRange { row: usize, hit: usize, link: i32 },

    /// Scratch array overflow.
    #[error(
        "{array} capacity exceeded: {required} required, {capacity} available ({} over)",
        excess(.required, .capacity)
    )]
    CapacityExceeded {
        array: ScratchArray,
        required: usize,
        capacity: usize,
    },

    /// Construction ended with tasks still pending.
    #[error("tracklet construction left {pending} task(s) unresolved")]
    IncompleteConstruction { pending: usize },

    /// Configuration error.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// File I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn excess(required: &usize, capacity: &usize) -> usize {
    required.saturating_sub(*capacity)
}

impl Error {
    /// Number of elements by which a scratch array overflowed, if this is a
    /// capacity error.
    #[must_use]
    pub fn overflow(&self) -> Option<(ScratchArray, usize)> {
        match self {
            Self::CapacityExceeded {
                array,
                required,
                capacity,
            } => Some((*array, required.saturating_sub(*capacity))),
            _ => None,
        }
    }
}

/// Errors raised by an accelerator backend.
///
/// These are never fatal: the framework falls back to the CPU path.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Backend precondition not met.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Backend execution failed.
    #[error("backend execution failed: {0}")]
    Failed(String),

    /// Slice-level failure raised inside the backend.
    #[error("core error: {0}")]
    Core(#[from] Error),
}
