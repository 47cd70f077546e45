//! # Connection Broker End-to-End Tests
//!
//! Stations connect to a broker listening on an ephemeral loopback port and
//! exchange real CD1.1 frames over TCP.

use async_trait::async_trait;
use cd11_config::{ConnManConfig, StationParameters};
use codec::{
    write_frame, ConnectionExchange, Frame, FrameReader, FrameType, FrameUnit, Payload,
};
use connman::{AddressResolver, BrokerError, ConnectionBroker, DnsResolver};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

fn config() -> ConnManConfig {
    let mut config = ConnManConfig::with_stations(vec![
        StationParameters::new("ABC", 4000, true),
        StationParameters::new("XYZ", 4001, false),
    ]);
    config.bind_address = "127.0.0.1".to_string();
    config.well_known_port = 0;
    config.data_manager_address = "10.0.0.5".to_string();
    config.heartbeat_timeout_secs = 1;
    config.disposal_timeout_ms = 2_000;
    config
}

async fn start(config: ConnManConfig) -> (Arc<ConnectionBroker>, SocketAddr, JoinHandle<()>) {
    let broker = Arc::new(ConnectionBroker::initialize(config, &DnsResolver).await.unwrap());
    let listener = broker.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let serving = Arc::clone(&broker);
    let handle = tokio::spawn(async move { serving.serve(listener).await.unwrap() });
    (broker, addr, handle)
}

fn connection_request(station: &str) -> Frame {
    Frame::new(
        station,
        "0",
        0,
        Payload::ConnectionRequest(ConnectionExchange {
            major_version: 1,
            minor_version: 1,
            station_or_responder_name: station.to_string(),
            station_or_responder_type: "IMS".to_string(),
            service_type: "TCP".to_string(),
            ip_address: Ipv4Addr::LOCALHOST,
            port: 0,
            second_ip_address: Ipv4Addr::UNSPECIFIED,
            second_port: 0,
        }),
    )
}

async fn wait_for_sessions(broker: &ConnectionBroker, count: usize) {
    for _ in 0..200 {
        if broker.sessions().len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("expected {count} live sessions, found {}", broker.sessions().len());
}

#[tokio::test]
async fn test_registered_station_is_redirected() {
    let (broker, addr, handle) = start(config()).await;

    let mut station = TcpStream::connect(addr).await.unwrap();
    write_frame(&mut station, &connection_request("ABC")).await.unwrap();

    let mut reader = FrameReader::new(station);
    let raw = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let FrameUnit::Parsed { frame, .. } = FrameUnit::from_raw(raw) else {
        panic!("response did not decode");
    };

    assert_eq!(frame.frame_type(), FrameType::ConnectionResponse);
    assert_eq!(frame.header.frame_creator, "IDC");
    let Payload::ConnectionResponse(response) = &frame.payload else {
        panic!("expected connection response payload");
    };
    assert_eq!(response.station_or_responder_name, "ABC");
    assert_eq!(response.ip_address, Ipv4Addr::new(10, 0, 0, 5));
    assert_eq!(response.port, 4000);
    assert_eq!(response.second_ip_address, Ipv4Addr::UNSPECIFIED);
    assert_eq!(response.second_port, 0);

    // Broker closes the connection once the response is sent
    let next = tokio::time::timeout(Duration::from_secs(5), reader.read_frame())
        .await
        .unwrap()
        .unwrap();
    assert!(next.is_none());

    broker.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unregistered_station_torn_down_by_heartbeat() {
    let (broker, addr, handle) = start(config()).await;

    let mut station = TcpStream::connect(addr).await.unwrap();
    let started = Instant::now();
    write_frame(&mut station, &connection_request("NOPE")).await.unwrap();

    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), station.read_to_end(&mut received))
        .await
        .unwrap()
        .unwrap();

    assert!(received.is_empty(), "no response frame expected");
    assert!(started.elapsed() >= Duration::from_millis(900));

    broker.shutdown();
    handle.await.unwrap();
}

#[tokio::test]
async fn test_shutdown_disposes_live_sessions() {
    let mut config = config();
    config.heartbeat_timeout_secs = 120;
    let (broker, addr, handle) = start(config).await;

    let mut first = TcpStream::connect(addr).await.unwrap();
    let mut second = TcpStream::connect(addr).await.unwrap();
    wait_for_sessions(&broker, 2).await;

    broker.shutdown();
    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .unwrap()
        .unwrap();
    assert!(broker.sessions().is_empty());

    for station in [&mut first, &mut second] {
        let mut buf = Vec::new();
        let read = tokio::time::timeout(Duration::from_secs(5), station.read_to_end(&mut buf))
            .await
            .unwrap();
        // Closed either cleanly or by reset
        assert!(read.map(|n| n == 0).unwrap_or(true));
    }

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn test_bind_failure_exhausts_retries() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let mut config = config();
    config.well_known_port = occupied.local_addr().unwrap().port();
    config.bind_retries = 3;
    config.bind_initial_wait_ms = 10;

    let broker = ConnectionBroker::initialize(config, &DnsResolver).await.unwrap();
    let err = broker.bind().await.unwrap_err();

    let BrokerError::Bind { attempts, .. } = &err else {
        panic!("expected bind error, got {err}");
    };
    // Initial attempt plus three retries
    assert_eq!(*attempts, 4);
    assert!(err.is_startup_fatal());
}

/// Fails a fixed number of times before answering
struct FlakyResolver {
    failures: u32,
    calls: AtomicU32,
}

#[async_trait]
impl AddressResolver for FlakyResolver {
    async fn resolve(&self, host: &str) -> io::Result<Ipv4Addr> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{host} not reachable yet"),
            ));
        }
        Ok(Ipv4Addr::new(10, 0, 0, 5))
    }
}

#[tokio::test]
async fn test_resolution_recovers_within_budget() {
    let mut config = config();
    config.resolve_initial_backoff_ms = 5;
    config.resolve_max_backoff_ms = 20;
    let resolver = FlakyResolver {
        failures: 2,
        calls: AtomicU32::new(0),
    };

    let broker = ConnectionBroker::initialize(config, &resolver).await.unwrap();
    assert_eq!(
        broker.lookup("ABC").map(|r| r.consumer_address),
        Some(Ipv4Addr::new(10, 0, 0, 5))
    );
    // Two failures then one success for the data manager, one for the provider
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_resolution_exhaustion_is_fatal() {
    let mut config = config();
    config.resolve_initial_backoff_ms = 1;
    config.resolve_max_backoff_ms = 5;
    config.resolve_max_attempts = 3;
    let resolver = FlakyResolver {
        failures: u32::MAX,
        calls: AtomicU32::new(0),
    };

    let err = ConnectionBroker::initialize(config, &resolver).await.unwrap_err();
    assert!(matches!(
        err,
        BrokerError::AddressResolution { attempts: 3, .. }
    ));
    assert!(err.is_startup_fatal());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 3);
}
