//! catrack-algorithms: Cellular-automaton track reconstruction for one
//! detector slice at a time.
//!
//! Pipeline stages, in order:
//! - **Grid** - per-row binned index for window queries
//! - **Neighbours** - best (down, up) links per hit, then consensus cleaning
//! - **Start hits** - chain origins compacted into a row-ordered array
//! - **Construction** - Kalman-fitted chain following, scheduled by row blocks
//! - **Selection** - hit-ownership arbitration with packed atomic weights
//!
//! [`Tracker`] drives the stages and an optional [`ReconstructionBackend`].
//!
#![warn(missing_docs)]

mod backend;
mod constructor;
mod fit;
pub mod grid;
mod neighbours;
mod scheduler;
mod selector;
mod slice;
mod start_hits;
mod tracker;

pub use backend::{LockstepBackend, ReconstructionBackend, DEFAULT_LANES_PER_BLOCK};
pub use constructor::{advance, run_task, TaskOutcome, TrackletState, TrackletTask};
pub use fit::LineFit;
pub use grid::Grid;
pub use neighbours::{clean_hit_links, clean_neighbours, find_hit_links, find_neighbours};
pub use scheduler::{construct_tracklets, row_blocks, Construction, RowBlock};
pub use selector::{pack_weight, select_tracks, Selection};
pub use slice::{ArenaHit, Row, SliceData, NO_LINK};
pub use start_hits::{find_start_hits, is_start_hit, sort_start_hits, StartHit};
pub use tracker::{reconstruct_cpu, summarize, Tracker};

// Re-export the core data model
pub use catrack_core::{
    BackendError, Error, ExecutionMode, Result, SliceInput, SliceOutput, Track, TrackerConfig,
};
