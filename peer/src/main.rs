//! Tether Peer - offline-first sync node.
//!
//! Opens the local store, optionally serves it to other devices on the LAN,
//! and keeps it reconciled with the active remote endpoint.

use std::sync::Arc;
use tether_engine::{RemoteEndpoint, Schema};
use tether_peer::{
    Config, ConnectionMonitor, Discovery, EndpointManager, PeerServer, SettingsStore,
    SqliteStore, SyncCoordinator, SyncWorker,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env before the filter reads RUST_LOG
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tether_peer=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    tracing::info!("Opening store at {}", config.database_url);
    let store = Arc::new(SqliteStore::open(&config.database_url, Schema::workshop()).await?);

    let settings = Arc::new(SettingsStore::load(&config.settings_path).await?);
    let endpoints = Arc::new(EndpointManager::new(Arc::clone(&settings)).await);

    if endpoints.current().is_empty() {
        pair_with_discovered(&config, &endpoints).await;
    }

    let mut server = PeerServer::new(Arc::clone(&store)).with_host(config.host);
    if config.serve {
        let saved = settings.snapshot().await;
        let token = config.token.clone().or(saved.server_token);
        let port = config.server_port(saved.server_port);
        let started = server.start(port, token).await?;
        tracing::info!("Serving peers at {}", started.url);

        settings
            .update(|s| {
                s.server_token = Some(started.info.token.clone());
                s.server_port = Some(started.info.port);
                Ok(())
            })
            .await?;
    }

    let monitor = Arc::new(
        ConnectionMonitor::new(Arc::clone(&endpoints), Arc::clone(&settings))
            .await
            .with_interval(config.monitor_interval),
    );
    let coordinator = SyncCoordinator::new(Arc::clone(&store));

    let cancel = CancellationToken::new();
    let worker = tokio::spawn(SyncWorker::new(coordinator, Arc::clone(&monitor)).run(cancel.clone()));
    let ticker = tokio::spawn(Arc::clone(&monitor).run(cancel.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    cancel.cancel();
    server.stop().await;
    let _ = tokio::join!(worker, ticker);
    store.pool().close().await;

    Ok(())
}

/// Look for a peer server on the LAN and make it the active endpoint.
async fn pair_with_discovered(config: &Config, endpoints: &EndpointManager) {
    let discovery = Discovery::new(config.discovery_port);
    let Some(url) = discovery.discover().await else {
        return;
    };

    let endpoint = match discovery.pair(&url).await {
        Ok(info) => RemoteEndpoint::new("discovered", "Discovered peer", &url)
            .map(|endpoint| endpoint.with_token(info.token).active()),
        Err(e) => {
            tracing::warn!(%url, "Pairing failed: {}", e);
            return;
        }
    };

    let added = match endpoint {
        Ok(endpoint) => endpoints.add(endpoint).await.map(|_| ()),
        Err(e) => Err(e.into()),
    };
    if let Err(e) = added {
        tracing::warn!(%url, "Could not save discovered endpoint: {}", e);
    }
}
