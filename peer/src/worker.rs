//! Background sync driven by connection status.

use crate::coordinator::{SyncCoordinator, SyncError};
use crate::monitor::ConnectionMonitor;
use crate::store::LocalStore;
use std::sync::Arc;
use tether_engine::RemoteEndpoint;
use tokio_util::sync::CancellationToken;

/// Runs a full pass when the device reconnects and pushes pending records
/// on every later connected check.
pub struct SyncWorker<S> {
    coordinator: SyncCoordinator<S>,
    monitor: Arc<ConnectionMonitor>,
}

impl<S: LocalStore> SyncWorker<S> {
    pub fn new(coordinator: SyncCoordinator<S>, monitor: Arc<ConnectionMonitor>) -> Self {
        Self {
            coordinator,
            monitor,
        }
    }

    /// Follow monitor status until cancelled.
    pub async fn run(self, cancel: CancellationToken) {
        let mut rx = self.monitor.subscribe();
        let mut connected = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let status = rx.borrow_and_update().clone();
                    if status.is_connected() {
                        let Some(remote) = self.monitor.active_endpoint() else {
                            continue;
                        };
                        if connected {
                            self.push_pending(&remote).await;
                        } else {
                            self.full_pass(&remote).await;
                        }
                        connected = true;
                    } else if status.is_disconnected() {
                        if connected {
                            tracing::info!(state = ?status.state, "Remote unavailable, sync paused");
                        }
                        connected = false;
                    }
                }
            }
        }
        tracing::info!("Sync worker stopped");
    }

    /// Push then pull every entity.
    async fn full_pass(&self, remote: &RemoteEndpoint) {
        match self.coordinator.sync_all(Some(remote)).await {
            Ok(report) => tracing::info!(
                endpoint = %remote.id,
                pushed = report.up.pushed,
                upserted = report.down.upserted,
                deleted = report.down.deleted,
                failed = report.failed_entities.len(),
                "Sync pass complete"
            ),
            Err(e) => tracing::error!(endpoint = %remote.id, "Sync pass failed: {}", e),
        }
    }

    async fn push_pending(&self, remote: &RemoteEndpoint) {
        for entity in self.coordinator.store().schema().sync_order() {
            match self.coordinator.sync_up(&entity, Some(remote)).await {
                Ok(_) => {}
                Err(SyncError::Store(e)) => {
                    tracing::error!(entity = %entity, "Push pass stopped: {}", e);
                    return;
                }
                Err(e) => tracing::warn!(entity = %entity, "Push failed: {}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::EndpointManager;
    use crate::server::PeerServer;
    use crate::settings::SettingsStore;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tempfile::TempDir;
    use tether_engine::{Schema, SyncState};

    #[tokio::test]
    async fn reconnect_pushes_offline_records() {
        let dir = TempDir::new().unwrap();
        let settings = Arc::new(
            SettingsStore::load(dir.path().join("settings.json"))
                .await
                .unwrap(),
        );
        let endpoints = Arc::new(EndpointManager::new(Arc::clone(&settings)).await);
        let monitor = Arc::new(
            ConnectionMonitor::new(Arc::clone(&endpoints), settings)
                .await
                .with_interval(Duration::from_millis(50)),
        );

        let server_store = Arc::new(MemoryStore::new(Schema::workshop()));
        let mut server = PeerServer::new(Arc::clone(&server_store))
            .with_host(IpAddr::V4(Ipv4Addr::LOCALHOST));
        let started = server.start(0, None).await.unwrap();

        let store = Arc::new(MemoryStore::new(Schema::workshop()));
        let coordinator = SyncCoordinator::new(Arc::clone(&store));
        let record = coordinator
            .create("clients", json!({"phone": "+100"}), None)
            .await
            .unwrap();
        assert_eq!(record.sync_state, SyncState::LocalOnly);

        endpoints
            .add(
                RemoteEndpoint::new("peer", "Peer", &started.url)
                    .unwrap()
                    .with_token(started.info.token.clone())
                    .active(),
            )
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let worker = tokio::spawn(SyncWorker::new(coordinator, Arc::clone(&monitor)).run(cancel.clone()));
        let ticker = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

        let synced = tokio::time::timeout(Duration::from_secs(10), async {
            loop {
                let current = store.get("clients", &record.local_id).await.unwrap().unwrap();
                if matches!(current.sync_state, SyncState::Synced { .. }) {
                    return current;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await
        .unwrap();

        let remote_id = synced.sync_state.remote_id().unwrap();
        assert!(server_store.get("clients", remote_id).await.unwrap().is_some());

        cancel.cancel();
        worker.await.unwrap();
        ticker.await.unwrap();
        server.stop().await;
    }
}
