//! Connection Manager Error Types
//!
//! Failures that reach the broker's caller. Per-connection problems (malformed
//! frames, unknown stations, heartbeat timeouts) are logged by the handler and
//! never surface here.

use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BrokerError {
    /// Dependent service address could not be resolved within the retry budget
    #[error("Failed to resolve {role} address {host} after {attempts} attempts: {source}")]
    AddressResolution {
        role: &'static str,
        host: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    /// Well-known port could not be bound within the retry budget
    #[error("Failed to bind {address} after {attempts} attempts: {source}")]
    Bind {
        address: String,
        attempts: u32,
        #[source]
        source: io::Error,
    },

    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Worker pool error: {message}")]
    WorkerPool { message: String },
}

pub type Result<T> = std::result::Result<T, BrokerError>;

impl BrokerError {
    pub fn address_resolution(
        role: &'static str,
        host: impl Into<String>,
        attempts: u32,
        source: io::Error,
    ) -> Self {
        Self::AddressResolution {
            role,
            host: host.into(),
            attempts,
            source,
        }
    }

    pub fn bind(address: impl Into<String>, attempts: u32, source: io::Error) -> Self {
        Self::Bind {
            address: address.into(),
            attempts,
            source,
        }
    }

    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn worker_pool(message: impl Into<String>) -> Self {
        Self::WorkerPool {
            message: message.into(),
        }
    }

    /// Get error category for metrics and logging
    pub fn category(&self) -> &'static str {
        match self {
            BrokerError::AddressResolution { .. } => "address_resolution",
            BrokerError::Bind { .. } => "bind",
            BrokerError::Configuration { .. } => "configuration",
            BrokerError::Io(_) => "io",
            BrokerError::WorkerPool { .. } => "worker_pool",
        }
    }

    /// Check if the operation that failed is worth retrying
    pub fn is_retryable(&self) -> bool {
        match self {
            // Retry budgets were already spent
            BrokerError::AddressResolution { .. } | BrokerError::Bind { .. } => false,
            BrokerError::Configuration { .. } => false,
            BrokerError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
            ),
            BrokerError::WorkerPool { .. } => true,
        }
    }

    /// Errors that abort process startup
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            BrokerError::AddressResolution { .. }
                | BrokerError::Bind { .. }
                | BrokerError::Configuration { .. }
        )
    }
}
