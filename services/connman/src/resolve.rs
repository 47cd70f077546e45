//! Host name resolution for dependent services

use async_trait::async_trait;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use tokio::net::lookup_host;

/// Resolves a configured host to the IPv4 address written into frames
#[async_trait]
pub trait AddressResolver: Send + Sync {
    async fn resolve(&self, host: &str) -> io::Result<Ipv4Addr>;
}

/// System resolver; literal addresses skip the lookup
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

#[async_trait]
impl AddressResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> io::Result<Ipv4Addr> {
        if let Ok(ip) = host.parse::<Ipv4Addr>() {
            return Ok(ip);
        }

        lookup_host((host, 0))
            .await?
            .find_map(|addr| match addr.ip() {
                IpAddr::V4(ip) => Some(ip),
                IpAddr::V6(_) => None,
            })
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no IPv4 address found for {host}"),
                )
            })
    }
}
