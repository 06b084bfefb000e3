//! Connection monitor for the active endpoint.
//!
//! The monitor is a small state machine driven by periodic liveness checks.
//! When the HTTP ping fails, a raw TCP connect tells a host that is gone
//! apart from one that is up but not serving.

use crate::endpoints::EndpointManager;
use crate::net::{self, TcpProbe};
use crate::remote::{self, RemoteClient};
use crate::settings::{self, SettingsStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tether_engine::{EndpointId, RemoteEndpoint};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Default interval between background checks.
pub const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Timeout of the liveness ping against the active endpoint.
pub const PING_TIMEOUT: Duration = Duration::from_secs(3);

/// Timeout of the TCP connect used for diagnosis.
pub const TCP_TIMEOUT: Duration = Duration::from_secs(2);

/// Timeout of each ping in [`ConnectionMonitor::probe_endpoints`].
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connection state of the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionState {
    #[default]
    Unknown,
    Checking,
    Connected,
    Disconnected,
    /// User override: disconnected without checking, no remote calls are
    /// made. See [`ConnectionStatus::is_disconnected`].
    OfflineMode,
}

/// Why the last check ended disconnected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Diagnosis {
    NoActiveEndpoint,
    /// No TCP answer from the host
    HostUnreachable,
    /// The host refused the port
    PortBlocked,
    /// The port accepts connections but the ping failed
    ServiceUnhealthy,
}

/// Published monitor status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnosis: Option<Diagnosis>,
    /// Endpoint the last check targeted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint_id: Option<EndpointId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checked_at: Option<DateTime<Utc>>,
}

impl ConnectionStatus {
    fn new(state: ConnectionState, endpoint: Option<&RemoteEndpoint>) -> Self {
        Self {
            state,
            diagnosis: None,
            endpoint_id: endpoint.map(|e| e.id.clone()),
            checked_at: Some(Utc::now()),
        }
    }

    fn disconnected(diagnosis: Diagnosis, endpoint: Option<&RemoteEndpoint>) -> Self {
        Self {
            diagnosis: Some(diagnosis),
            ..Self::new(ConnectionState::Disconnected, endpoint)
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Known to have no usable remote, either after a failed check or
    /// because offline mode is on.
    pub fn is_disconnected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Disconnected | ConnectionState::OfflineMode
        )
    }
}

/// Tracks reachability of the active endpoint and the offline override.
#[derive(Debug)]
pub struct ConnectionMonitor {
    endpoints: Arc<EndpointManager>,
    settings: Arc<SettingsStore>,
    client: RemoteClient,
    tx: watch::Sender<ConnectionStatus>,
    reachability: DashMap<EndpointId, bool>,
    offline: AtomicBool,
    interval: Duration,
}

impl ConnectionMonitor {
    pub async fn new(endpoints: Arc<EndpointManager>, settings: Arc<SettingsStore>) -> Self {
        let offline = settings.snapshot().await.offline_mode;
        let initial = if offline {
            ConnectionStatus::new(ConnectionState::OfflineMode, None)
        } else {
            ConnectionStatus::default()
        };
        let (tx, _) = watch::channel(initial);

        Self {
            endpoints,
            settings,
            client: RemoteClient::with_client(remote::http_client(PING_TIMEOUT)),
            tx,
            reachability: DashMap::new(),
            offline: AtomicBool::new(offline),
            interval: CHECK_INTERVAL,
        }
    }

    /// Builder-style method to set the background check interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    pub fn is_offline_mode(&self) -> bool {
        self.offline.load(Ordering::SeqCst)
    }

    /// Set the sticky offline override and persist it.
    pub async fn set_offline_mode(&self, offline: bool) -> settings::Result<()> {
        self.settings
            .update(|settings| {
                settings.offline_mode = offline;
                Ok(())
            })
            .await?;
        self.offline.store(offline, Ordering::SeqCst);
        tracing::info!(offline, "Offline mode changed");

        if offline {
            self.publish(ConnectionStatus::new(ConnectionState::OfflineMode, None));
        } else {
            self.publish(ConnectionStatus::default());
        }
        Ok(())
    }

    /// The endpoint sync should target, or `None` while offline mode is set
    /// or no endpoint is active.
    pub fn active_endpoint(&self) -> Option<RemoteEndpoint> {
        if self.is_offline_mode() {
            return None;
        }
        self.endpoints.active()
    }

    /// Check the active endpoint and publish the result.
    ///
    /// In offline mode nothing is probed unless `force` is set; a forced
    /// check reports the probe result but keeps the override.
    pub async fn check_connection(&self, force: bool) -> ConnectionStatus {
        if self.is_offline_mode() && !force {
            let status = ConnectionStatus::new(ConnectionState::OfflineMode, None);
            self.publish(status.clone());
            return status;
        }

        let Some(endpoint) = self.endpoints.active() else {
            let status = ConnectionStatus::disconnected(Diagnosis::NoActiveEndpoint, None);
            self.publish(status.clone());
            return status;
        };

        self.publish(ConnectionStatus::new(
            ConnectionState::Checking,
            Some(&endpoint),
        ));

        let status = match self.client.ping(&endpoint.base_url, PING_TIMEOUT).await {
            Ok(_) => ConnectionStatus::new(ConnectionState::Connected, Some(&endpoint)),
            Err(e) => {
                let diagnosis = diagnose(&endpoint.base_url).await;
                tracing::debug!(
                    endpoint = %endpoint.id,
                    ?diagnosis,
                    "Liveness check failed: {}",
                    e
                );
                ConnectionStatus::disconnected(diagnosis, Some(&endpoint))
            }
        };

        self.reachability
            .insert(endpoint.id.clone(), status.is_connected());
        self.publish(status.clone());
        status
    }

    /// Ping every configured endpoint concurrently and record which answer.
    ///
    /// Does nothing in offline mode and keeps the last known reachability.
    pub async fn probe_endpoints(&self) -> Vec<(EndpointId, bool)> {
        if self.is_offline_mode() {
            tracing::debug!("Offline mode, skipping endpoint pings");
            return Vec::new();
        }

        let endpoints: Vec<RemoteEndpoint> = self.endpoints.current().into_vec();

        let probes = endpoints.iter().map(|endpoint| async move {
            let reachable = self
                .client
                .ping(&endpoint.base_url, PROBE_TIMEOUT)
                .await
                .is_ok();
            (endpoint.id.clone(), reachable)
        });
        let results = futures::future::join_all(probes).await;

        self.reachability.clear();
        for (id, reachable) in &results {
            self.reachability.insert(id.clone(), *reachable);
        }
        results
    }

    /// Last known reachability of an endpoint.
    pub fn reachability(&self, id: &str) -> Option<bool> {
        self.reachability.get(id).map(|entry| *entry.value())
    }

    /// Check on every tick until cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval = ?self.interval, "Connection monitor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.check_connection(false).await;
                }
            }
        }
        tracing::info!("Connection monitor stopped");
    }

    fn publish(&self, status: ConnectionStatus) {
        let previous = self.tx.send_replace(status.clone());
        if previous.state != status.state || previous.diagnosis != status.diagnosis {
            tracing::info!(
                from = ?previous.state,
                to = ?status.state,
                diagnosis = ?status.diagnosis,
                "Connection state changed"
            );
        }
    }
}

/// Classify a failed ping with a raw TCP connect.
async fn diagnose(base_url: &str) -> Diagnosis {
    let Some((host, port)) = net::host_port(base_url) else {
        return Diagnosis::HostUnreachable;
    };
    match net::probe_tcp(&host, port, TCP_TIMEOUT).await {
        TcpProbe::Open => Diagnosis::ServiceUnhealthy,
        TcpProbe::Refused => Diagnosis::PortBlocked,
        TcpProbe::Unreachable => Diagnosis::HostUnreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::PeerServer;
    use crate::store::MemoryStore;
    use std::net::{IpAddr, Ipv4Addr};
    use tempfile::TempDir;
    use tether_engine::Schema;
    use tokio::net::TcpListener;

    async fn monitor(dir: &TempDir) -> ConnectionMonitor {
        let settings = Arc::new(
            SettingsStore::load(dir.path().join("settings.json"))
                .await
                .unwrap(),
        );
        let endpoints = Arc::new(EndpointManager::new(Arc::clone(&settings)).await);
        ConnectionMonitor::new(endpoints, settings).await
    }

    async fn activate(monitor: &ConnectionMonitor, url: &str) {
        monitor
            .endpoints
            .add(RemoteEndpoint::new("peer", "Peer", url).unwrap().active())
            .await
            .unwrap();
    }

    async fn free_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn no_active_endpoint() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;

        let status = monitor.check_connection(false).await;

        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.diagnosis, Some(Diagnosis::NoActiveEndpoint));
        assert!(monitor.active_endpoint().is_none());
    }

    #[tokio::test]
    async fn connected_to_running_peer() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let mut server = PeerServer::new(Arc::new(MemoryStore::new(Schema::workshop())))
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let started = server.start(0, None).await.unwrap();
        activate(&monitor, &started.url).await;

        let status = monitor.check_connection(false).await;

        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.endpoint_id.as_deref(), Some("peer"));
        assert_eq!(monitor.reachability("peer"), Some(true));
        assert_eq!(monitor.status(), status);

        server.stop().await;
    }

    #[tokio::test]
    async fn closed_port_is_diagnosed() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let port = free_port().await;
        activate(&monitor, &format!("http://127.0.0.1:{port}")).await;

        let status = monitor.check_connection(false).await;

        assert_eq!(status.state, ConnectionState::Disconnected);
        assert_eq!(status.diagnosis, Some(Diagnosis::PortBlocked));
    }

    #[tokio::test]
    async fn non_peer_listener_is_unhealthy() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        // Accept and immediately close every connection
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                drop(socket);
            }
        });
        activate(&monitor, &format!("http://127.0.0.1:{port}")).await;

        let status = monitor.check_connection(false).await;

        assert_eq!(status.diagnosis, Some(Diagnosis::ServiceUnhealthy));
    }

    #[tokio::test]
    async fn offline_mode_is_sticky_and_persisted() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let port = free_port().await;
        activate(&monitor, &format!("http://127.0.0.1:{port}")).await;

        monitor.set_offline_mode(true).await.unwrap();
        assert!(monitor.active_endpoint().is_none());

        let status = monitor.check_connection(false).await;
        assert_eq!(status.state, ConnectionState::OfflineMode);
        assert!(status.is_disconnected());
        assert!(!status.is_connected());

        let forced = monitor.check_connection(true).await;
        assert_eq!(forced.state, ConnectionState::Disconnected);
        assert!(monitor.is_offline_mode());

        let reloaded = self::monitor(&dir).await;
        assert!(reloaded.is_offline_mode());
        assert_eq!(reloaded.status().state, ConnectionState::OfflineMode);

        monitor.set_offline_mode(false).await.unwrap();
        assert_eq!(monitor.active_endpoint().map(|e| e.id), Some("peer".into()));
    }

    #[tokio::test]
    async fn probes_every_endpoint() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let mut server = PeerServer::new(Arc::new(MemoryStore::new(Schema::workshop())))
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let started = server.start(0, None).await.unwrap();
        let port = free_port().await;

        monitor
            .endpoints
            .add(RemoteEndpoint::new("up", "Up", &started.url).unwrap())
            .await
            .unwrap();
        monitor
            .endpoints
            .add(RemoteEndpoint::new("down", "Down", &format!("http://127.0.0.1:{port}")).unwrap())
            .await
            .unwrap();

        let results = monitor.probe_endpoints().await;

        assert_eq!(results.len(), 2);
        assert_eq!(monitor.reachability("up"), Some(true));
        assert_eq!(monitor.reachability("down"), Some(false));

        server.stop().await;
    }

    #[tokio::test]
    async fn offline_mode_skips_endpoint_pings() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir).await;
        let port = free_port().await;
        monitor
            .endpoints
            .add(RemoteEndpoint::new("a", "A", &format!("http://127.0.0.1:{port}")).unwrap())
            .await
            .unwrap();
        monitor
            .endpoints
            .add(RemoteEndpoint::new("b", "B", "http://127.0.0.1:9").unwrap())
            .await
            .unwrap();

        monitor.set_offline_mode(true).await.unwrap();
        let results = monitor.probe_endpoints().await;

        assert!(results.is_empty());
        assert_eq!(monitor.reachability("a"), None);
        assert_eq!(monitor.reachability("b"), None);
    }

    #[tokio::test]
    async fn run_stops_on_cancel() {
        let dir = TempDir::new().unwrap();
        let monitor = Arc::new(monitor(&dir).await.with_interval(Duration::from_millis(20)));
        let mut rx = monitor.subscribe();
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));
        rx.changed().await.unwrap();
        assert_eq!(
            rx.borrow().diagnosis,
            Some(Diagnosis::NoActiveEndpoint)
        );

        cancel.cancel();
        handle.await.unwrap();
    }
}
