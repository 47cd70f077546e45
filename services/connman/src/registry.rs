//! Station Registry
//!
//! Built once from configuration and read-only afterwards, so handlers share it
//! through an `Arc` without locking.

use cd11_config::StationParameters;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use tracing::{info, warn};

/// Where an acquired station is redirected
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationRecord {
    pub name: String,
    /// Address the station is expected to send data from
    pub expected_provider_address: Ipv4Addr,
    pub consumer_address: Ipv4Addr,
    pub consumer_port: u16,
}

#[derive(Debug, Default)]
pub struct StationRegistry {
    stations: HashMap<String, StationRecord>,
    /// Stations configured with `acquired = false`
    ignored: HashSet<String>,
}

impl StationRegistry {
    pub fn build(
        stations: &[StationParameters],
        provider_address: Ipv4Addr,
        consumer_address: Ipv4Addr,
    ) -> Self {
        let mut registry = Self::default();

        for station in stations {
            let name = station.station_name.clone();
            // An ignored name stays ignored whatever other entries say
            if !station.acquired {
                info!(
                    station = %name,
                    "Station is configured to not be acquired, ignoring connection requests"
                );
                registry.ignored.insert(name);
                continue;
            }

            let record = StationRecord {
                name: name.clone(),
                expected_provider_address: provider_address,
                consumer_address,
                consumer_port: station.port,
            };
            if registry.stations.insert(name.clone(), record).is_some() {
                warn!(station = %name, "Station configured more than once, keeping the last entry");
            }
        }

        info!(
            acquired = registry.stations.len(),
            ignored = registry.ignored.len(),
            consumer = %consumer_address,
            "Station registry built"
        );
        registry
    }

    pub fn lookup(&self, name: &str) -> Option<&StationRecord> {
        self.stations.get(name)
    }

    pub fn is_ignored(&self, name: &str) -> bool {
        self.ignored.contains(name)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}
