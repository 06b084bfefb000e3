//! # Tether Engine
//!
//! A deterministic reconciliation engine for offline-first applications.
//!
//! This crate holds the pure part of synchronizing a device's local records
//! with one remote endpoint: the record model, the entity schema, an
//! in-memory store, pull/push planning and the configured endpoint set.
//!
//! ## Design Principles
//!
//! - **No IO**: Engine has no knowledge of files, network, or clocks
//! - **Deterministic**: Same inputs always produce same outputs
//! - **Testable**: Pure logic, no mocks needed
//!
//! Identifiers and timestamps are supplied by the caller.
//!
//! ## Core Concepts
//!
//! ### Records
//!
//! Each [`Record`] carries a local id, an optional natural key derived from
//! its payload, and a [`SyncState`]:
//! - `local-only` - never confirmed by a remote
//! - `synced { remote_id }` - matches the remote copy
//! - `dirty { remote_id }` - edited locally after having been synced
//!
//! ### Reconciliation
//!
//! [`plan_pull`] compares local records with a fetched remote collection and
//! decides what to delete and what to overwrite. Local work always survives a
//! pull. [`plan_push`] turns pending records into [`PushOp`]s.
//!
//! ### Endpoints
//!
//! [`EndpointSet`] is the ordered list of configured remotes, at most one of
//! which is active.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{plan_pull, RemoteRecord, Schema, Store, SyncState};
//! use serde_json::json;
//!
//! let mut store = Store::new(Schema::workshop());
//!
//! // Written while offline
//! let record = store
//!     .create("repairs", "local-1", json!({"receiptId": 1042}), 1706745600000)
//!     .unwrap();
//! assert_eq!(record.sync_state, SyncState::LocalOnly);
//! assert_eq!(record.natural_key.as_deref(), Some("1042"));
//!
//! // The remote knows nothing yet: the local-only record survives the pull
//! let local: Vec<_> = store.list("repairs").unwrap().into_iter().cloned().collect();
//! let remote = vec![RemoteRecord::new("r-7", Some("7".into()), json!({"receiptId": 7}))];
//! let plan = plan_pull(&local, &remote);
//! assert!(plan.deletions.is_empty());
//! assert_eq!(plan.upserts.len(), 1);
//! ```

pub mod endpoint;
pub mod error;
pub mod operation;
pub mod reconcile;
pub mod record;
pub mod schema;
pub mod store;

// Re-export main types at crate root
pub use endpoint::{EndpointSet, RemoteEndpoint};
pub use error::Error;
pub use operation::{CreateOp, PushOp, UpdateOp};
pub use reconcile::{plan_pull, plan_push, PullPlan, SkipReason, Skipped, Upsert};
pub use record::{Metadata, Record, RemoteRecord, SyncState};
pub use schema::{EntitySchema, ParentLink, Schema};
pub use store::{Collection, Store};

/// Type aliases for clarity
pub type LocalId = String;
pub type RemoteId = String;
pub type EntityName = String;
pub type NaturalKey = String;
pub type EndpointId = String;
pub type Version = u64;
pub type Timestamp = u64;
