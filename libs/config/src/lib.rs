//! # CD1.1 Station Receiver Configuration
//!
//! Typed configuration for the connection manager: listener and bind retry
//! settings, dependent service addresses, the station list and gap storage.
//!
//! ## Usage
//!
//! ```no_run
//! use cd11_config::ConnManConfig;
//! use std::path::Path;
//!
//! let config = ConnManConfig::load(Path::new("config/connman.toml"))?;
//! println!("listening on {}", config.well_known_port);
//! # Ok::<(), anyhow::Error>(())
//! ```

pub mod connman;

pub use connman::{ConnManConfig, GapSettings, StationParameters};
