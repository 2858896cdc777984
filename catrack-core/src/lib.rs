//! catrack-core: Core types for cellular-automaton slice tracking.
//!
//! This crate provides the data model shared by the reconstruction stages:
//! hits and slice geometry, tracklets and tracks, the tracker configuration,
//! the error taxonomy and reconstruction statistics.
//!

pub mod config;
pub mod error;
pub mod event;
pub mod hit;
pub mod statistics;
pub mod track;

pub use config::{ExecutionMode, TrackerConfig};
pub use error::{BackendError, Error, Result, ScratchArray};
pub use event::{EventInput, SliceInput, SliceOutput};
pub use hit::{Hit, SliceGeometry, DEFAULT_POSITION_ERROR};
pub use statistics::{EventStatistics, SliceStatistics, StageTimings};
pub use track::{Track, TrackHit, TrackParams, Tracklet, TrackletHit};
