//! Single writer over the configured endpoint list.

use crate::settings::{Result, SettingsStore};
use std::sync::Arc;
use tether_engine::{EndpointSet, RemoteEndpoint};
use tokio::sync::watch;

/// Owns endpoint mutations: each one is persisted, then published.
///
/// Readers hold a [`watch::Receiver`] and never observe a list that was not
/// written to disk.
#[derive(Debug)]
pub struct EndpointManager {
    settings: Arc<SettingsStore>,
    tx: watch::Sender<EndpointSet>,
}

impl EndpointManager {
    pub async fn new(settings: Arc<SettingsStore>) -> Self {
        let initial = settings.snapshot().await.endpoints;
        let (tx, _) = watch::channel(initial);
        Self { settings, tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<EndpointSet> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> EndpointSet {
        self.tx.borrow().clone()
    }

    /// The active endpoint, if any.
    pub fn active(&self) -> Option<RemoteEndpoint> {
        self.tx.borrow().active().cloned()
    }

    pub async fn add(&self, endpoint: RemoteEndpoint) -> Result<EndpointSet> {
        self.mutate(|set| Ok(set.add(endpoint)?)).await
    }

    pub async fn update(&self, endpoint: RemoteEndpoint) -> Result<EndpointSet> {
        self.mutate(|set| Ok(set.update(endpoint)?)).await
    }

    pub async fn remove(&self, id: &str) -> Result<EndpointSet> {
        self.mutate(|set| set.remove(id).map(|_| ()).map_err(Into::into))
            .await
    }

    pub async fn activate(&self, id: &str) -> Result<EndpointSet> {
        self.mutate(|set| Ok(set.activate(id)?)).await
    }

    /// Deactivate every endpoint, leaving the device without a remote.
    pub async fn deactivate_all(&self) -> Result<EndpointSet> {
        self.mutate(|set| {
            set.deactivate_all();
            Ok(())
        })
        .await
    }

    async fn mutate(
        &self,
        change: impl FnOnce(&mut EndpointSet) -> Result<()>,
    ) -> Result<EndpointSet> {
        let (_, settings) = self
            .settings
            .update(|settings| change(&mut settings.endpoints))
            .await?;

        let endpoints = settings.endpoints;
        tracing::debug!(
            count = endpoints.len(),
            active = endpoints.active().map(|e| e.id.as_str()),
            "Endpoint list changed"
        );
        self.tx.send_replace(endpoints.clone());
        Ok(endpoints)
    }
}
