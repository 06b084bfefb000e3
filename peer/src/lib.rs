//! Tether peer runtime.
//!
//! Wires the [`tether_engine`] reconciliation logic to real IO: a durable
//! [`LocalStore`], an HTTP [`RemoteClient`], the embedded [`PeerServer`]
//! that lets this device act as the remote for others, LAN [`Discovery`],
//! and the [`ConnectionMonitor`] that decides when to sync.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_engine::{RemoteEndpoint, Schema};
//! use tether_peer::{MemoryStore, SyncCoordinator};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(MemoryStore::new(Schema::workshop()));
//! let coordinator = SyncCoordinator::new(store);
//!
//! // Offline: the record is written locally and pushed later
//! let record = coordinator
//!     .create("repairs", serde_json::json!({"receiptId": 1042}), None)
//!     .await?;
//!
//! let remote = RemoteEndpoint::new("shop", "Shop", "http://192.168.1.20:8787")?
//!     .with_token("token")
//!     .active();
//! coordinator.sync_up("repairs", Some(&remote)).await?;
//! # let _ = record;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod endpoints;
pub mod error;
pub mod monitor;
pub mod net;
pub mod protocol;
pub mod remote;
pub mod server;
pub mod settings;
pub mod store;
pub mod worker;

pub use config::{Config, ConfigError};
pub use coordinator::{SyncAllReport, SyncCoordinator, SyncDownReport, SyncError, SyncUpReport};
pub use discovery::Discovery;
pub use endpoints::EndpointManager;
pub use error::AppError;
pub use monitor::{ConnectionMonitor, ConnectionState, ConnectionStatus, Diagnosis};
pub use remote::{RemoteClient, RemoteError};
pub use server::{router, AppState, PeerServer, ServerError, StartedServer};
pub use settings::{DeviceSettings, SettingsError, SettingsStore};
pub use store::{LocalStore, MemoryStore, SqliteStore, StoreError};
pub use worker::SyncWorker;
