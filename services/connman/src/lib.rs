//! # CD1.1 Connection Manager
//!
//! Stations open a connection to the well-known port and send a
//! `CONNECTION_REQUEST`. The broker answers acquired stations with a
//! `CONNECTION_RESPONSE` that redirects them to their data consumer, then
//! closes the connection. Data transfer happens on the redirected endpoint.
//!
//! ```no_run
//! use cd11_config::ConnManConfig;
//! use connman::{ConnectionBroker, DnsResolver};
//! use std::path::Path;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = ConnManConfig::load(Path::new("config/connman.toml"))?;
//! let broker = ConnectionBroker::initialize(config, &DnsResolver).await?;
//! let listener = broker.bind().await?;
//! broker.serve(listener).await?;
//! # Ok(())
//! # }
//! ```

pub mod broker;
pub mod error;
pub mod handler;
pub mod pool;
pub mod registry;
pub mod resolve;
pub mod retry;
pub mod session;

pub use broker::ConnectionBroker;
pub use error::{BrokerError, Result};
pub use handler::{
    connection_response, inspect_frame, ConnectionHandshakeHandler, HandlerContext,
    HandshakeOutcome, Verdict,
};
pub use pool::WorkerPool;
pub use registry::{StationRecord, StationRegistry};
pub use resolve::{AddressResolver, DnsResolver};
pub use retry::RetryPolicy;
pub use session::{Session, SessionTracker};
