//! Durable per-station gap state
//!
//! One JSON file per station at `<dir>/<station><extension>`. Loading never
//! fails: a missing or unreadable file yields a fresh tracker. Saving and
//! clearing surface every I/O failure to the caller.

use crate::error::GapStoreError;
use crate::tracker::{GapTracker, GapTrackerState};
use cd11_config::GapSettings;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct GapStateStore {
    dir: PathBuf,
    extension: String,
}

impl GapStateStore {
    /// Open the store, creating the storage directory if needed
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Result<Self, GapStoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| GapStoreError::CreateDir {
            path: dir.clone(),
            source,
        })?;

        info!(path = %dir.display(), "Gap state storage ready");
        Ok(Self {
            dir,
            extension: extension.into(),
        })
    }

    /// Open the store at the configured path and file extension
    pub fn from_settings(settings: &GapSettings) -> Result<Self, GapStoreError> {
        Self::new(settings.storage_path.clone(), settings.file_extension.clone())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, station: &str) -> PathBuf {
        self.dir.join(format!("{station}{}", self.extension))
    }

    /// Load a station's tracker, falling back to a fresh one
    pub fn load(&self, station: &str) -> GapTracker {
        let path = self.path_for(station);

        let contents = match fs::read(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(station, "No persisted gap state, starting fresh");
                return GapTracker::new();
            }
            Err(e) => {
                warn!(station, path = %path.display(), error = %e, "Failed to read gap state, starting fresh");
                return GapTracker::new();
            }
        };

        let state: GapTrackerState = match serde_json::from_slice(&contents) {
            Ok(state) => state,
            Err(e) => {
                warn!(station, path = %path.display(), error = %e, "Corrupt gap state, starting fresh");
                return GapTracker::new();
            }
        };

        match GapTracker::from_state(&state) {
            Ok(tracker) => {
                info!(
                    station,
                    min = state.min,
                    max = state.max,
                    gaps = state.gaps.len(),
                    "Restored gap state"
                );
                tracker
            }
            Err(e) => {
                warn!(station, error = %e, "Inconsistent gap state, starting fresh");
                GapTracker::new()
            }
        }
    }

    /// Persist a station's tracker through a temporary file and rename
    pub fn save(&self, station: &str, tracker: &GapTracker) -> Result<(), GapStoreError> {
        let state = tracker.state();
        let bytes = serde_json::to_vec_pretty(&state).map_err(|source| GapStoreError::Serialize {
            station: station.to_string(),
            source,
        })?;

        let path = self.path_for(station);
        let temp = self.dir.join(format!(".{station}{}.tmp", self.extension));
        let write_err = |source| GapStoreError::Write {
            path: path.clone(),
            source,
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&temp)
            .map_err(write_err)?;
        file.write_all(&bytes).map_err(write_err)?;
        file.sync_all().map_err(write_err)?;
        drop(file);
        fs::rename(&temp, &path).map_err(write_err)?;

        debug!(station, gaps = state.gaps.len(), "Persisted gap state");
        Ok(())
    }

    /// Delete a station's persisted state; absent state is not an error
    pub fn clear(&self, station: &str) -> Result<(), GapStoreError> {
        let path = self.path_for(station);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(station, "Cleared persisted gap state");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(GapStoreError::Remove { path, source }),
        }
    }
}
