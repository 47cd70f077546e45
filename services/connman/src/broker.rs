//! # Connection Broker
//!
//! Owns the station registry, the well-known listening socket and every live
//! handshake session. Startup is `initialize` then `bind`; `serve` runs the
//! accept loop until `shutdown` is called.
//!
//! Shutdown order: stop accepting, dispose live sessions and wait for them up
//! to the disposal timeout, then close the listener.

use crate::error::{BrokerError, Result};
use crate::handler::{ConnectionHandshakeHandler, HandlerContext};
use crate::pool::WorkerPool;
use crate::registry::{StationRecord, StationRegistry};
use crate::resolve::AddressResolver;
use crate::retry::RetryPolicy;
use crate::session::SessionTracker;
use cd11_config::ConnManConfig;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Ceiling for the wait between bind attempts
const BIND_MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Pause after a failed accept so persistent errors do not spin
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug)]
pub struct ConnectionBroker {
    config: ConnManConfig,
    handler: ConnectionHandshakeHandler,
    shutdown: watch::Sender<bool>,
}

impl ConnectionBroker {
    /// Resolve dependent addresses and build the station registry
    pub async fn initialize(config: ConnManConfig, resolver: &dyn AddressResolver) -> Result<Self> {
        config
            .validate()
            .map_err(|e| BrokerError::configuration(format!("{e:#}"), None))?;

        let policy = RetryPolicy::new(
            config.resolve_initial_backoff(),
            config.resolve_max_backoff(),
            config.resolve_max_attempts,
        );
        let consumer =
            resolve_with_retry(resolver, &policy, "data manager", &config.data_manager_address)
                .await?;
        let provider =
            resolve_with_retry(resolver, &policy, "data provider", &config.data_provider_address)
                .await?;

        let registry = StationRegistry::build(&config.stations, provider, consumer);
        let handler = ConnectionHandshakeHandler::new(HandlerContext {
            registry: Arc::new(registry),
            pool: WorkerPool::new(config.worker_threads),
            sessions: Arc::new(SessionTracker::new()),
            responder_name: config.responder_name.clone(),
            heartbeat_timeout: config.heartbeat_timeout(),
        });

        info!(
            consumer = %consumer,
            provider = %provider,
            workers = config.worker_threads,
            "Connection broker initialized"
        );

        Ok(Self {
            config,
            handler,
            shutdown: watch::channel(false).0,
        })
    }

    /// Open the well-known port, retrying with backoff
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = format!("{}:{}", self.config.bind_address, self.config.well_known_port);
        let policy = RetryPolicy::new(
            self.config.bind_initial_wait(),
            BIND_MAX_BACKOFF,
            // First attempt plus the configured retries
            self.config.bind_retries.saturating_add(1),
        );

        let target = address.as_str();
        let listener = policy
            .retry("bind", |_| TcpListener::bind(target))
            .await
            .map_err(|e| BrokerError::bind(target, policy.attempts(), e))?;

        info!(address = %listener.local_addr()?, "Listening for station connection requests");
        Ok(listener)
    }

    /// Accept connections until shutdown, then dispose live sessions
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let mut shutdown = self.shutdown.subscribe();

        loop {
            if self.is_shutting_down() {
                break;
            }

            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        info!(peer = %peer, "Accepted station connection");

                        let session = self.sessions().register();
                        let handler = self.handler.clone();
                        tokio::spawn(async move {
                            let outcome = handler.run(stream, peer.to_string(), session).await;
                            debug!(peer = %peer, outcome = ?outcome, "Connection finished");
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "Failed to accept connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("No longer accepting station connections");
        let disposed = self.sessions().dispose_all();
        if disposed > 0 {
            info!(disposed, "Disposing live sessions");
        }
        if !self.sessions().wait_idle(self.config.disposal_timeout()).await {
            warn!(
                remaining = self.sessions().len(),
                timeout_ms = self.config.disposal_timeout_ms,
                "Sessions still open after disposal timeout"
            );
        }

        drop(listener);
        self.handler.context().pool.close();
        info!("Connection broker stopped");
        Ok(())
    }

    /// Signal the accept loop and every live session to stop
    pub fn shutdown(&self) {
        if !self.shutdown.send_replace(true) {
            info!(sessions = self.sessions().len(), "Connection broker shutting down");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown.borrow()
    }

    pub fn lookup(&self, station: &str) -> Option<&StationRecord> {
        self.registry().lookup(station)
    }

    pub fn registry(&self) -> &StationRegistry {
        &self.handler.context().registry
    }

    pub fn sessions(&self) -> &Arc<SessionTracker> {
        &self.handler.context().sessions
    }

    pub fn config(&self) -> &ConnManConfig {
        &self.config
    }
}

async fn resolve_with_retry(
    resolver: &dyn AddressResolver,
    policy: &RetryPolicy,
    role: &'static str,
    host: &str,
) -> Result<Ipv4Addr> {
    let ip = policy
        .retry(role, |_| resolver.resolve(host))
        .await
        .map_err(|e| BrokerError::address_resolution(role, host, policy.attempts(), e))?;
    debug!(role, host, ip = %ip, "Resolved address");
    Ok(ip)
}
