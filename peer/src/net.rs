//! Local network helpers shared by discovery, the monitor and the server.

use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;

/// Non-loopback IPv4 addresses of this device's interfaces.
pub fn local_ipv4_addrs() -> Vec<Ipv4Addr> {
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => interfaces
            .into_iter()
            .filter_map(|(_, ip)| match ip {
                IpAddr::V4(v4) if !v4.is_loopback() && !v4.is_unspecified() => Some(v4),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::warn!("Failed to list network interfaces: {}", e);
            Vec::new()
        }
    }
}

/// Distinct `/24` prefixes (first three octets) of the given addresses.
pub fn subnet_prefixes(addrs: &[Ipv4Addr]) -> Vec<[u8; 3]> {
    addrs
        .iter()
        .map(|addr| {
            let [a, b, c, _] = addr.octets();
            [a, b, c]
        })
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Address this device advertises to peers, falling back to loopback.
pub fn lan_address() -> IpAddr {
    local_ip_address::local_ip().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

/// Host and port of an `http(s)://` base URL.
pub fn host_port(base_url: &str) -> Option<(String, u16)> {
    let url = reqwest::Url::parse(base_url).ok()?;
    let host = url.host_str()?.trim_matches(['[', ']']).to_string();
    let port = url.port_or_known_default()?;
    Some((host, port))
}

/// Outcome of a raw TCP connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpProbe {
    /// Something accepted the connection
    Open,
    /// The host answered but nothing listens on the port
    Refused,
    /// No answer within the timeout, or no route
    Unreachable,
}

/// Try a TCP connect to `host:port`.
pub async fn probe_tcp(host: &str, port: u16, timeout: Duration) -> TcpProbe {
    let connect = async {
        match host.parse::<IpAddr>() {
            Ok(ip) => TcpStream::connect(SocketAddr::new(ip, port)).await,
            Err(_) => TcpStream::connect((host, port)).await,
        }
    };

    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => TcpProbe::Open,
        Ok(Err(e)) if e.kind() == ErrorKind::ConnectionRefused => TcpProbe::Refused,
        Ok(Err(e)) => {
            tracing::debug!(host, port, "TCP probe failed: {}", e);
            TcpProbe::Unreachable
        }
        Err(_) => TcpProbe::Unreachable,
    }
}
