//! Connection Manager Configuration
//!
//! Loaded from a TOML file with `CD11_` environment overrides. Nested keys use
//! a double underscore, e.g. `CD11_GAPS__STORAGE_PATH`.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

/// Top-level connection manager configuration
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct ConnManConfig {
    /// Port stations dial to request a data connection
    #[serde(default = "default_well_known_port")]
    pub well_known_port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Retries after the first failed bind
    #[serde(default = "default_bind_retries")]
    pub bind_retries: u32,
    #[serde(default = "default_bind_initial_wait_ms")]
    pub bind_initial_wait_ms: u64,

    /// Host of the data consumer stations are redirected to
    #[serde(default = "default_local_host")]
    pub data_manager_address: String,
    /// Host stations are expected to connect from
    #[serde(default = "default_local_host")]
    pub data_provider_address: String,

    /// Frame creator written on outbound frames
    #[serde(default = "default_responder_name")]
    pub responder_name: String,

    #[serde(default = "default_heartbeat_timeout_secs")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_disposal_timeout_ms")]
    pub disposal_timeout_ms: u64,
    /// Upper bound on concurrent frame validation jobs
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,

    #[serde(default = "default_resolve_initial_backoff_ms")]
    pub resolve_initial_backoff_ms: u64,
    #[serde(default = "default_resolve_max_backoff_ms")]
    pub resolve_max_backoff_ms: u64,
    #[serde(default = "default_resolve_max_attempts")]
    pub resolve_max_attempts: u32,

    pub stations: Vec<StationParameters>,

    #[serde(default)]
    pub gaps: GapSettings,
}

/// One configured station
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct StationParameters {
    pub station_name: String,
    /// Data consumer port the station is redirected to
    pub port: u16,
    #[serde(default = "default_acquired")]
    pub acquired: bool,
}

/// Gap state persistence settings
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct GapSettings {
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,
    #[serde(default = "default_file_extension")]
    pub file_extension: String,
    /// 0 never expires gaps
    #[serde(default)]
    pub expiration_days: u64,
    #[serde(default = "default_storage_interval_minutes")]
    pub storage_interval_minutes: u64,
}

impl Default for GapSettings {
    fn default() -> Self {
        Self {
            storage_path: default_storage_path(),
            file_extension: default_file_extension(),
            expiration_days: 0,
            storage_interval_minutes: default_storage_interval_minutes(),
        }
    }
}

fn default_well_known_port() -> u16 {
    8041
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_bind_retries() -> u32 {
    5
}

fn default_bind_initial_wait_ms() -> u64 {
    1_000
}

fn default_local_host() -> String {
    "127.0.0.1".to_string()
}

fn default_responder_name() -> String {
    "IDC".to_string()
}

fn default_heartbeat_timeout_secs() -> u64 {
    120
}

fn default_disposal_timeout_ms() -> u64 {
    5_000
}

fn default_worker_threads() -> usize {
    4
}

fn default_resolve_initial_backoff_ms() -> u64 {
    1_000
}

fn default_resolve_max_backoff_ms() -> u64 {
    60_000
}

fn default_resolve_max_attempts() -> u32 {
    15
}

fn default_acquired() -> bool {
    true
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("./gaps")
}

fn default_file_extension() -> String {
    ".json".to_string()
}

fn default_storage_interval_minutes() -> u64 {
    5
}

impl ConnManConfig {
    /// Load from a required TOML file, then `CD11_` environment overrides
    pub fn load(path: &Path) -> Result<Self> {
        info!("Loading connection manager config: {:?}", path);

        let config = Config::builder()
            .add_source(File::from(path).required(true))
            .add_source(
                Environment::with_prefix("CD11")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let mut config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.expand_env_vars()?;
        config.validate()?;

        debug!(
            stations = config.stations.len(),
            port = config.well_known_port,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Expand environment variables in the gap storage path
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let raw = self.gaps.storage_path.to_string_lossy().into_owned();
        let expanded = shellexpand::full(&raw).context("Failed to expand gap storage path")?;
        self.gaps.storage_path = PathBuf::from(expanded.as_ref());
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.responder_name.trim().is_empty() {
            bail!("responder_name must not be empty");
        }
        if self.worker_threads == 0 {
            bail!("worker_threads must be at least 1");
        }
        for station in &self.stations {
            if station.station_name.trim().is_empty() {
                bail!("station_name must not be empty");
            }
            if station.port == 0 {
                bail!("station {} has port 0", station.station_name);
            }
        }
        Ok(())
    }

    pub fn bind_initial_wait(&self) -> Duration {
        Duration::from_millis(self.bind_initial_wait_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn disposal_timeout(&self) -> Duration {
        Duration::from_millis(self.disposal_timeout_ms)
    }

    pub fn resolve_initial_backoff(&self) -> Duration {
        Duration::from_millis(self.resolve_initial_backoff_ms)
    }

    pub fn resolve_max_backoff(&self) -> Duration {
        Duration::from_millis(self.resolve_max_backoff_ms)
    }

    /// Configuration with defaults for everything but the station list
    pub fn with_stations(stations: Vec<StationParameters>) -> Self {
        Self {
            well_known_port: default_well_known_port(),
            bind_address: default_bind_address(),
            bind_retries: default_bind_retries(),
            bind_initial_wait_ms: default_bind_initial_wait_ms(),
            data_manager_address: default_local_host(),
            data_provider_address: default_local_host(),
            responder_name: default_responder_name(),
            heartbeat_timeout_secs: default_heartbeat_timeout_secs(),
            disposal_timeout_ms: default_disposal_timeout_ms(),
            worker_threads: default_worker_threads(),
            resolve_initial_backoff_ms: default_resolve_initial_backoff_ms(),
            resolve_max_backoff_ms: default_resolve_max_backoff_ms(),
            resolve_max_attempts: default_resolve_max_attempts(),
            stations,
            gaps: GapSettings::default(),
        }
    }
}

impl StationParameters {
    pub fn new(station_name: impl Into<String>, port: u16, acquired: bool) -> Self {
        Self {
            station_name: station_name.into(),
            port,
            acquired,
        }
    }
}
