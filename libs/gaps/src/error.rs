//! Gap tracking errors
//!
//! [`GapError`] is a contract violation by the immediate caller. [`GapStoreError`]
//! is a persistence failure that the caller must decide how to handle.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Precondition failures on gap set operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GapError {
    #[error("Invalid range: minimum {min} exceeds maximum {max}")]
    InvalidRange { min: u64, max: u64 },

    #[error("Value {value} outside tracked range [{min}, {max}]")]
    ValueOutOfRange { value: u64, min: u64, max: u64 },

    #[error("Gaps out of order or overlapping: gap ending at {previous_end} precedes gap starting at {next_start}")]
    OverlappingGaps { previous_end: u64, next_start: u64 },
}

impl GapError {
    pub fn category(&self) -> &'static str {
        match self {
            GapError::InvalidRange { .. } => "invalid_range",
            GapError::ValueOutOfRange { .. } => "value_out_of_range",
            GapError::OverlappingGaps { .. } => "overlapping_gaps",
        }
    }
}

/// Gap state persistence failures
#[derive(Debug, Error)]
pub enum GapStoreError {
    #[error("Failed to create gap storage directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write gap state to {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to remove gap state file {path}: {source}")]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize gap state for station {station}: {source}")]
    Serialize {
        station: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GapStoreError {
    pub fn category(&self) -> &'static str {
        match self {
            GapStoreError::CreateDir { .. } => "create_dir",
            GapStoreError::Write { .. } => "write",
            GapStoreError::Remove { .. } => "remove",
            GapStoreError::Serialize { .. } => "serialize",
        }
    }

    /// Whether repeating the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            GapStoreError::Write { source, .. } | GapStoreError::Remove { source, .. } => {
                !matches!(source.kind(), io::ErrorKind::PermissionDenied)
            }
            GapStoreError::CreateDir { .. } | GapStoreError::Serialize { .. } => false,
        }
    }
}
