//! Local record storage.
//!
//! [`LocalStore`] is the device's authoritative record set. Each call is one
//! atomic unit; a sync pass issues one call per record so a failure only
//! affects the record it happened on.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::{create_pool, run_migrations, SqliteStore};

use std::future::Future;
use tether_engine::{Record, RemoteRecord, Schema, Timestamp, Version};

/// Errors raised by a local store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Engine(#[from] tether_engine::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("Corrupt record {local_id}: {reason}")]
    Corrupt { local_id: String, reason: String },
}

impl StoreError {
    /// Whether the error is a natural key clash.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(
            self,
            StoreError::Engine(tether_engine::Error::DuplicateNaturalKey { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Transactional storage for business records.
///
/// Implementations assign local ids and timestamps. `create` and `update`
/// reject a payload whose natural key is already held by another record of
/// the entity.
pub trait LocalStore: Send + Sync + 'static {
    /// Schema the store validates payloads against.
    fn schema(&self) -> &Schema;

    /// Write a new `local-only` record.
    fn create(
        &self,
        entity: &str,
        payload: serde_json::Value,
    ) -> impl Future<Output = Result<Record>> + Send;

    fn get(
        &self,
        entity: &str,
        local_id: &str,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    /// All records of an entity, oldest first.
    fn list(&self, entity: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;

    /// `local-only` and `dirty` records of an entity, oldest first.
    fn pending(&self, entity: &str) -> impl Future<Output = Result<Vec<Record>>> + Send;

    fn find_by_natural_key(
        &self,
        entity: &str,
        key: &str,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    fn find_by_remote_id(
        &self,
        entity: &str,
        remote_id: &str,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;

    /// Replace a record's payload. A `synced` record becomes `dirty`.
    fn update(
        &self,
        entity: &str,
        local_id: &str,
        payload: serde_json::Value,
    ) -> impl Future<Output = Result<Record>> + Send;

    /// Record that the remote accepted the record as of `pushed_version`.
    fn mark_synced(
        &self,
        entity: &str,
        local_id: &str,
        remote_id: &str,
        pushed_version: Version,
    ) -> impl Future<Output = Result<Record>> + Send;

    /// Write a remote copy as a `synced` record, overwriting `existing` or
    /// the record already mapped to the remote id, else inserting.
    fn upsert_remote(
        &self,
        entity: &str,
        existing: Option<&str>,
        remote: &RemoteRecord,
    ) -> impl Future<Output = Result<Record>> + Send;

    /// Remove a record unconditionally. Returns the removed record.
    fn remove(
        &self,
        entity: &str,
        local_id: &str,
    ) -> impl Future<Output = Result<Option<Record>>> + Send;
}

/// Current time in milliseconds since the epoch.
pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis().max(0) as Timestamp
}

/// A fresh local record id.
pub(crate) fn new_local_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
