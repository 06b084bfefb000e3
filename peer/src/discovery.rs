//! LAN discovery of peer servers.
//!
//! Every `/24` subnet the device sits on is swept with `GET /api/ping`
//! probes. The first host answering `{"status":"ok"}` wins and the remaining
//! probes are aborted.

use crate::net;
use crate::protocol::ServerInfo;
use crate::remote::{self, RemoteClient};
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::task::JoinSet;

/// Timeout for a single host probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Timeout for a whole sweep.
pub const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(8);

/// Subnet scanner for peer servers listening on a fixed port.
#[derive(Debug, Clone)]
pub struct Discovery {
    port: u16,
    probe_timeout: Duration,
    overall_timeout: Duration,
    client: RemoteClient,
}

impl Discovery {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            probe_timeout: PROBE_TIMEOUT,
            overall_timeout: DISCOVERY_TIMEOUT,
            client: RemoteClient::with_client(remote::http_client(PROBE_TIMEOUT)),
        }
    }

    /// Builder-style method to override the probe and sweep timeouts.
    pub fn with_timeouts(mut self, probe: Duration, overall: Duration) -> Self {
        self.probe_timeout = probe;
        self.overall_timeout = overall;
        self
    }

    /// Sweep every subnet of the device's interfaces.
    ///
    /// Returns the base URL of the first server found, or `None` when no
    /// probe succeeds before the sweep timeout.
    pub async fn discover(&self) -> Option<String> {
        let own = net::local_ipv4_addrs();
        let prefixes = net::subnet_prefixes(&own);
        if prefixes.is_empty() {
            tracing::info!("No IPv4 interfaces to scan");
            return None;
        }
        self.sweep(&prefixes, own.into_iter().collect()).await
    }

    /// Sweep the given `/24` prefixes.
    ///
    /// The device's own addresses are skipped.
    pub async fn discover_in(&self, prefixes: &[[u8; 3]]) -> Option<String> {
        let own = net::local_ipv4_addrs().into_iter().collect();
        self.sweep(prefixes, own).await
    }

    /// Fetch the pairing info of a discovered server.
    pub async fn pair(&self, base_url: &str) -> remote::Result<ServerInfo> {
        self.client.server_info(base_url).await
    }

    async fn sweep(&self, prefixes: &[[u8; 3]], own: HashSet<Ipv4Addr>) -> Option<String> {
        tracing::info!(
            port = self.port,
            subnets = prefixes.len(),
            "Scanning for peer servers"
        );

        let mut probes = JoinSet::new();
        for [a, b, c] in prefixes.iter().copied() {
            for host in 1..=254u8 {
                let ip = Ipv4Addr::new(a, b, c, host);
                if own.contains(&ip) {
                    continue;
                }

                let client = self.client.clone();
                let url = format!("http://{}:{}", ip, self.port);
                let timeout = self.probe_timeout;
                probes.spawn(async move {
                    client.ping(&url, timeout).await.ok().map(|_| url)
                });
            }
        }

        let first = async {
            while let Some(result) = probes.join_next().await {
                if let Ok(Some(url)) = result {
                    return Some(url);
                }
            }
            None
        };

        let found = tokio::time::timeout(self.overall_timeout, first)
            .await
            .ok()
            .flatten();
        probes.abort_all();

        match &found {
            Some(url) => tracing::info!(%url, "Discovered peer server"),
            None => tracing::info!("No peer server found"),
        }
        found
    }
}
