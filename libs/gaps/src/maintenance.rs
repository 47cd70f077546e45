//! Background gap maintenance for one station
//!
//! Periodically expires old gaps and persists the tracker, with a final save
//! once shutdown is signalled.

use crate::error::GapStoreError;
use crate::store::GapStateStore;
use crate::tracker::GapTracker;
use cd11_config::GapSettings;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Shortest period a maintenance timer runs at
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Maintenance schedule and retry behaviour
#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    /// Gap age limit and sweep period; `None` never expires gaps
    pub expiration: Option<Duration>,
    pub persist_interval: Duration,
    pub retry_attempts: u32,
    pub retry_initial_backoff: Duration,
    pub retry_max_backoff: Duration,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            expiration: None,
            persist_interval: Duration::from_secs(5 * 60),
            retry_attempts: 10,
            retry_initial_backoff: Duration::from_millis(500),
            retry_max_backoff: Duration::from_secs(30),
        }
    }
}

impl MaintenanceSettings {
    /// Settings from the configured expiration in days (0 = never) and
    /// storage interval in minutes
    pub fn from_config(expiration_days: u64, storage_interval_minutes: u64) -> Self {
        Self {
            expiration: (expiration_days > 0)
                .then(|| Duration::from_secs(expiration_days * 24 * 60 * 60)),
            persist_interval: Duration::from_secs(storage_interval_minutes.max(1) * 60),
            ..Self::default()
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_initial_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.retry_max_backoff)
    }
}

impl From<&GapSettings> for MaintenanceSettings {
    fn from(settings: &GapSettings) -> Self {
        Self::from_config(settings.expiration_days, settings.storage_interval_minutes)
    }
}

/// Retry a store operation with exponential backoff
async fn with_retry<F>(
    settings: &MaintenanceSettings,
    station: &str,
    action: &'static str,
    op: F,
) -> Result<(), GapStoreError>
where
    F: Fn() -> Result<(), GapStoreError> + Send + Clone + 'static,
{
    let mut attempt = 0;
    loop {
        let result = tokio::task::spawn_blocking(op.clone())
            .await
            .unwrap_or_else(|join_err| {
                Err(GapStoreError::Write {
                    path: station.into(),
                    source: std::io::Error::other(join_err),
                })
            });

        match result {
            Ok(()) => return Ok(()),
            Err(e) if e.is_retryable() && attempt < settings.retry_attempts => {
                let delay = settings.backoff(attempt);
                attempt += 1;
                warn!(
                    station,
                    action,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Gap state operation failed, retrying"
                );
                sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Save a tracker, retrying transient failures
pub async fn persist_with_retry(
    tracker: &Arc<GapTracker>,
    store: &Arc<GapStateStore>,
    station: &str,
    settings: &MaintenanceSettings,
) -> Result<(), GapStoreError> {
    let (tracker, store, name) = (Arc::clone(tracker), Arc::clone(store), station.to_string());
    with_retry(settings, station, "persist", move || {
        store.save(&name, &tracker)
    })
    .await
}

/// Clear persisted state then reset the tracker
///
/// The tracker is reset even when clearing ultimately fails.
pub async fn reset_station_gaps(
    tracker: &Arc<GapTracker>,
    store: &Arc<GapStateStore>,
    station: &str,
    settings: &MaintenanceSettings,
) {
    let (store_ref, name) = (Arc::clone(store), station.to_string());
    if let Err(e) = with_retry(settings, station, "clear", move || store_ref.clear(&name)).await {
        warn!(station, error = %e, "Failed to clear gap state before reset");
    }
    tracker.reset();
    info!(station, "Station gap state reset");
}

/// Run expiry and persistence for one station until `shutdown` turns true
pub fn spawn_gap_maintenance(
    tracker: Arc<GapTracker>,
    store: Arc<GapStateStore>,
    station: String,
    settings: MaintenanceSettings,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // interval_at panics on a zero period
        let expiration = settings.expiration.map(|d| d.max(MIN_PERIOD));
        let persist_period = settings.persist_interval.max(MIN_PERIOD);

        // Never ticks when expiry is disabled; the select guard skips it
        let expiry_period = expiration.unwrap_or(Duration::from_secs(24 * 60 * 60));
        let mut expiry = interval_at(Instant::now() + expiry_period, expiry_period);
        expiry.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut persist = interval_at(Instant::now() + persist_period, persist_period);
        persist.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            station = %station,
            expiration_secs = expiration.map(|d| d.as_secs()),
            persist_secs = persist_period.as_secs(),
            "Gap maintenance started"
        );

        loop {
            tokio::select! {
                _ = expiry.tick(), if expiration.is_some() => {
                    if let Some(max_age) = expiration {
                        let removed = tracker.remove_expired_gaps(max_age);
                        debug!(station = %station, removed, "Expired gap sweep");
                    }
                }
                _ = persist.tick() => {
                    if let Err(e) = persist_with_retry(&tracker, &store, &station, &settings).await {
                        error!(station = %station, error = %e, "Could not persist gap state");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        if let Err(e) = persist_with_retry(&tracker, &store, &station, &settings).await {
            error!(station = %station, error = %e, "Final gap state save failed");
        }
        info!(station = %station, "Gap maintenance stopped");
    })
}
