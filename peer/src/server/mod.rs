//! Embedded peer server.
//!
//! [`PeerServer`] exposes the device's [`LocalStore`] over the entity API so
//! another device's `RemoteClient` can use this device as its remote.
//! Handlers delegate straight to the store; conflict handling stays with the
//! calling device.

mod auth;
mod routes;

pub use auth::Authorized;

use crate::net;
use crate::protocol::ServerInfo;
use crate::store::LocalStore;
use axum::Router;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// How long `start` waits for the listener to be bound.
pub const READY_TIMEOUT: Duration = Duration::from_secs(5);

/// How long `stop` lets in-flight requests drain before aborting.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// State shared across handlers.
pub struct AppState<S> {
    pub store: Arc<S>,
    /// Bearer token required on entity routes
    pub token: Arc<str>,
    /// Discovery payload served on `/api/server-info`
    pub info: Arc<ServerInfo>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            token: Arc::clone(&self.token),
            info: Arc::clone(&self.info),
        }
    }
}

impl<S> AppState<S> {
    pub fn new(store: Arc<S>, info: ServerInfo) -> Self {
        Self {
            store,
            token: Arc::from(info.token.as_str()),
            info: Arc::new(info),
        }
    }
}

/// Build the peer API router.
pub fn router<S: LocalStore>(state: AppState<S>) -> Router {
    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Server already running at {0}")]
    AlreadyRunning(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Listener not ready after {0:?}")]
    NotReady(Duration),

    #[error("Listener task exited before becoming ready")]
    TaskExited,
}

/// A server that is accepting connections.
#[derive(Debug, Clone)]
pub struct StartedServer {
    /// Base URL other devices should use
    pub url: String,
    pub info: ServerInfo,
    /// Address the listener is bound to
    pub local_addr: SocketAddr,
}

struct Running {
    started: StartedServer,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Lifecycle handle for the embedded server.
///
/// The handle is valid as soon as it is constructed; the listener attaches
/// in a background task on [`PeerServer::start`].
pub struct PeerServer<S> {
    store: Arc<S>,
    host: IpAddr,
    running: Option<Running>,
}

impl<S: LocalStore> PeerServer<S> {
    /// A stopped server bound to all interfaces once started.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            running: None,
        }
    }

    /// Builder-style method to bind a specific interface.
    pub fn with_host(mut self, host: IpAddr) -> Self {
        self.host = host;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.handle.is_finished())
    }

    pub fn started(&self) -> Option<&StartedServer> {
        self.running.as_ref().map(|running| &running.started)
    }

    /// Start listening on `port` (`0` picks a free port).
    ///
    /// A token is generated when none is given. Returns once the listener
    /// is bound, or fails after [`READY_TIMEOUT`].
    pub async fn start(
        &mut self,
        port: u16,
        token: Option<String>,
    ) -> Result<StartedServer, ServerError> {
        if let Some(started) = self.started().filter(|_| self.is_running()) {
            return Err(ServerError::AlreadyRunning(started.url.clone()));
        }

        let token = token
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        let addr = SocketAddr::new(self.host, port);
        let advertised = if self.host.is_unspecified() {
            net::lan_address()
        } else {
            self.host
        };

        let cancel = CancellationToken::new();
        let shutdown = cancel.clone();
        let store = Arc::clone(&self.store);
        let (ready_tx, ready_rx) = oneshot::channel();

        let handle = tokio::spawn(async move {
            let listener = match TcpListener::bind(addr).await {
                Ok(listener) => listener,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };
            let local_addr = match listener.local_addr() {
                Ok(local_addr) => local_addr,
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            let info = ServerInfo {
                address: advertised.to_string(),
                port: local_addr.port(),
                token,
            };
            let app = router(AppState::new(store, info.clone()));

            if ready_tx.send(Ok((local_addr, info))).is_err() {
                return;
            }
            tracing::info!(%local_addr, "Peer server listening");

            let result = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            match result {
                Ok(()) => tracing::info!(%local_addr, "Peer server stopped"),
                Err(e) => tracing::error!(%local_addr, "Peer server error: {}", e),
            }
        });

        let (local_addr, info) = match tokio::time::timeout(READY_TIMEOUT, ready_rx).await {
            Ok(Ok(Ok(ready))) => ready,
            Ok(Ok(Err(source))) => return Err(ServerError::Bind { addr, source }),
            Ok(Err(_)) => return Err(ServerError::TaskExited),
            Err(_) => {
                cancel.cancel();
                handle.abort();
                return Err(ServerError::NotReady(READY_TIMEOUT));
            }
        };

        let started = StartedServer {
            url: info.base_url(),
            info,
            local_addr,
        };
        self.running = Some(Running {
            started: started.clone(),
            cancel,
            handle,
        });

        Ok(started)
    }

    /// Stop the server, draining in-flight requests for at most
    /// [`DRAIN_TIMEOUT`]. Returns false if it was not running.
    pub async fn stop(&mut self) -> bool {
        let Some(running) = self.running.take() else {
            return false;
        };

        running.cancel.cancel();
        let mut handle = running.handle;
        if tokio::time::timeout(DRAIN_TIMEOUT, &mut handle).await.is_err() {
            tracing::warn!(
                url = %running.started.url,
                "Peer server did not drain in time, aborting"
            );
            handle.abort();
        }
        true
    }
}

impl<S> Drop for PeerServer<S> {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
