//! # Connection Handshake Handler
//!
//! Serves one station connection on the well-known port. The station sends a
//! `CONNECTION_REQUEST`; if it is an acquired station the handler answers with
//! a `CONNECTION_RESPONSE` naming the station's data consumer and closes the
//! connection.
//!
//! Per connection:
//!
//! - Frames are read one at a time, each within the heartbeat timeout.
//! - Structural decode, comm verification and registry lookup run on the
//!   [`WorkerPool`](crate::pool::WorkerPool) via [`inspect_frame`].
//! - Malformed frames, comm verification mismatches, other frame types and
//!   unknown or ignored stations are logged; the handler keeps reading.
//! - A heartbeat timeout disposes every session on the broker.
//! - Disposal of the handler's own [`Session`] ends the connection at once.

use crate::pool::WorkerPool;
use crate::registry::{StationRecord, StationRegistry};
use crate::session::{Session, SessionTracker};
use codec::{
    verify_comm_verification, write_frame, ConnectionExchange, Frame, FrameReader, FrameUnit,
    Payload, RawFrame,
};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Shared state every handler on a broker works against
#[derive(Debug)]
pub struct HandlerContext {
    pub registry: Arc<StationRegistry>,
    pub pool: WorkerPool,
    pub sessions: Arc<SessionTracker>,
    /// Frame creator on outbound frames
    pub responder_name: String,
    pub heartbeat_timeout: Duration,
}

/// How a connection ended
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Response sent and connection closed
    Redirected {
        station: String,
        consumer: SocketAddrV4,
    },
    /// No frame within the heartbeat timeout
    TimedOut,
    /// Disposed by the broker
    Disposed,
    /// Station closed the connection on a frame boundary
    PeerClosed,
    Failed(io::Error),
}

/// Result of inspecting one inbound frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Redirect {
        record: StationRecord,
        response: Frame,
    },
    Skip,
}

/// Decode and classify one raw frame
///
/// CPU-bound; run it on the worker pool.
pub fn inspect_frame(
    raw: RawFrame,
    registry: &StationRegistry,
    responder_name: &str,
    peer: &str,
) -> Verdict {
    let (frame, raw) = match FrameUnit::from_raw(raw) {
        FrameUnit::Parsed { frame, raw } => (frame, raw),
        FrameUnit::Malformed(malformed) => {
            warn!(
                peer,
                station = malformed.station.as_deref().unwrap_or("unknown"),
                error = %malformed.cause,
                bytes = malformed.raw.len(),
                "Discarding malformed frame"
            );
            return Verdict::Skip;
        }
    };

    if !verify_comm_verification(&raw) {
        warn!(
            peer,
            station = %frame.header.frame_creator,
            frame_type = %frame.frame_type(),
            "Comm verification mismatch, processing frame anyway"
        );
    }

    let Some(request) = frame.payload.as_connection_request() else {
        warn!(
            peer,
            station = %frame.header.frame_creator,
            frame_type = %frame.frame_type(),
            "Ignoring frame that is not a connection request"
        );
        return Verdict::Skip;
    };

    let station = request.station_or_responder_name.as_str();
    if registry.is_ignored(station) {
        info!(peer, station, "Dropping connection request from station that is not acquired");
        return Verdict::Skip;
    }

    match registry.lookup(station) {
        Some(record) => Verdict::Redirect {
            response: connection_response(request, record, responder_name),
            record: record.clone(),
        },
        None => {
            warn!(peer, station, "Connection request from unregistered station");
            Verdict::Skip
        }
    }
}

/// Response redirecting a station to its consumer
///
/// Station name, type and versions are echoed from the request.
pub fn connection_response(
    request: &ConnectionExchange,
    record: &StationRecord,
    responder_name: &str,
) -> Frame {
    let exchange = ConnectionExchange {
        ip_address: record.consumer_address,
        port: record.consumer_port,
        second_ip_address: Ipv4Addr::UNSPECIFIED,
        second_port: 0,
        ..request.clone()
    };
    Frame::new(
        responder_name,
        record.name.as_str(),
        0,
        Payload::ConnectionResponse(exchange),
    )
}

#[derive(Debug, Clone)]
pub struct ConnectionHandshakeHandler {
    context: Arc<HandlerContext>,
}

impl ConnectionHandshakeHandler {
    pub fn new(context: HandlerContext) -> Self {
        Self {
            context: Arc::new(context),
        }
    }

    pub fn context(&self) -> &HandlerContext {
        &self.context
    }

    /// Serve one connection until it is redirected, times out, closes or is disposed
    pub async fn run<S>(&self, stream: S, peer: String, mut session: Session) -> HandshakeOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let session_id = session.id();
        debug!(peer = %peer, session = session_id, "Awaiting connection request");

        tokio::select! {
            outcome = self.handshake(stream, &peer) => outcome,
            _ = session.disposed() => {
                info!(peer = %peer, session = session_id, "Session disposed, closing connection");
                HandshakeOutcome::Disposed
            }
        }
    }

    async fn handshake<S>(&self, stream: S, peer: &str) -> HandshakeOutcome
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = FrameReader::new(read_half);
        let heartbeat = self.context.heartbeat_timeout;

        loop {
            let raw = match timeout(heartbeat, reader.read_frame()).await {
                Ok(Ok(Some(raw))) => raw,
                Ok(Ok(None)) => {
                    info!(peer, "Station closed connection without a redirect");
                    return HandshakeOutcome::PeerClosed;
                }
                Ok(Err(e)) => {
                    warn!(peer, error = %e, "Failed to read from station");
                    return HandshakeOutcome::Failed(e);
                }
                Err(_) => {
                    let disposed = self.context.sessions.dispose_all();
                    warn!(
                        peer,
                        timeout_secs = heartbeat.as_secs_f64(),
                        disposed,
                        "No frame within heartbeat timeout, disposing sessions"
                    );
                    return HandshakeOutcome::TimedOut;
                }
            };
            debug!(peer, bytes = raw.bytes().len(), "Frame received");

            let context = Arc::clone(&self.context);
            let origin = peer.to_string();
            let verdict = self
                .context
                .pool
                .run(move || {
                    inspect_frame(raw, &context.registry, &context.responder_name, &origin)
                })
                .await;

            let (record, response) = match verdict {
                Ok(Verdict::Redirect { record, response }) => (record, response),
                Ok(Verdict::Skip) => continue,
                Err(e) => {
                    error!(peer, error = %e, "Frame inspection failed");
                    return HandshakeOutcome::Failed(io::Error::other(e));
                }
            };

            if let Err(e) = write_frame(&mut write_half, &response).await {
                warn!(peer, station = %record.name, error = %e, "Failed to send connection response");
                return HandshakeOutcome::Failed(e);
            }
            if let Err(e) = write_half.shutdown().await {
                debug!(peer, error = %e, "Error closing connection after response");
            }

            let consumer = SocketAddrV4::new(record.consumer_address, record.consumer_port);
            info!(
                peer,
                station = %record.name,
                consumer = %consumer,
                "Redirected station to data consumer"
            );
            return HandshakeOutcome::Redirected {
                station: record.name,
                consumer,
            };
        }
    }
}
