//! # Sequence Gap Tracking
//!
//! ## Purpose
//!
//! Records which CD1.1 sequence numbers a station has not yet delivered, in a
//! form that survives restarts and feeds outbound acknacks.
//!
//! ## Components
//! - [`SequenceGapSet`]: lock-guarded interval set over the `u64` sequence space
//! - [`GapTracker`]: rollover detection and acknack-shaped reporting
//! - [`GapStateStore`]: one JSON state file per station
//! - [`spawn_gap_maintenance`]: periodic expiry and persistence
//!
//! ## Sentinel Range
//!
//! A tracker that has seen nothing spans `[0, u64::MAX]` with `min = 0` and
//! `max = u64::MAX`. The first sequence number received collapses the observed
//! range to that value.

pub mod error;
pub mod gap_set;
pub mod maintenance;
pub mod store;
pub mod tracker;

pub use error::{GapError, GapStoreError};
pub use gap_set::{SequenceGap, SequenceGapSet, EMPTY_MARKER};
pub use maintenance::{
    persist_with_retry, reset_station_gaps, spawn_gap_maintenance, MaintenanceSettings,
};
pub use store::GapStateStore;
pub use tracker::{GapReport, GapTracker, GapTrackerState, ResetCheck};
