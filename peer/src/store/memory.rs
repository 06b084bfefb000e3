//! In-memory store for tests and ephemeral runs.

use super::{new_local_id, now_millis, LocalStore, Result};
use tether_engine::{Record, RemoteRecord, Schema, Store, Version};
use tokio::sync::Mutex;

/// The engine [`Store`] behind an async mutex.
#[derive(Debug)]
pub struct MemoryStore {
    schema: Schema,
    inner: Mutex<Store>,
}

impl MemoryStore {
    pub fn new(schema: Schema) -> Self {
        Self {
            inner: Mutex::new(Store::new(schema.clone())),
            schema,
        }
    }

    /// Insert a fully formed record, bypassing validation of its state.
    pub async fn insert(&self, record: Record) -> Result<()> {
        Ok(self.inner.lock().await.insert(record)?)
    }

    /// Number of records across all entities.
    pub async fn record_count(&self) -> usize {
        self.inner.lock().await.record_count()
    }
}

impl LocalStore for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    async fn create(&self, entity: &str, payload: serde_json::Value) -> Result<Record> {
        let mut store = self.inner.lock().await;
        Ok(store.create(entity, new_local_id(), payload, now_millis())?)
    }

    async fn get(&self, entity: &str, local_id: &str) -> Result<Option<Record>> {
        let store = self.inner.lock().await;
        self.schema.entity(entity)?;
        Ok(store.get(entity, local_id).cloned())
    }

    async fn list(&self, entity: &str) -> Result<Vec<Record>> {
        let store = self.inner.lock().await;
        Ok(store.list(entity)?.into_iter().cloned().collect())
    }

    async fn pending(&self, entity: &str) -> Result<Vec<Record>> {
        let store = self.inner.lock().await;
        Ok(store.pending(entity)?.into_iter().cloned().collect())
    }

    async fn find_by_natural_key(&self, entity: &str, key: &str) -> Result<Option<Record>> {
        let store = self.inner.lock().await;
        self.schema.entity(entity)?;
        Ok(store.find_by_natural_key(entity, key).cloned())
    }

    async fn find_by_remote_id(&self, entity: &str, remote_id: &str) -> Result<Option<Record>> {
        let store = self.inner.lock().await;
        self.schema.entity(entity)?;
        Ok(store.find_by_remote_id(entity, remote_id).cloned())
    }

    async fn update(
        &self,
        entity: &str,
        local_id: &str,
        payload: serde_json::Value,
    ) -> Result<Record> {
        let mut store = self.inner.lock().await;
        Ok(store.update(entity, local_id, payload, now_millis())?)
    }

    async fn mark_synced(
        &self,
        entity: &str,
        local_id: &str,
        remote_id: &str,
        pushed_version: Version,
    ) -> Result<Record> {
        let mut store = self.inner.lock().await;
        Ok(store.mark_synced(entity, local_id, remote_id, pushed_version, now_millis())?)
    }

    async fn upsert_remote(
        &self,
        entity: &str,
        existing: Option<&str>,
        remote: &RemoteRecord,
    ) -> Result<Record> {
        let mut store = self.inner.lock().await;
        Ok(store.upsert_remote(entity, existing, new_local_id(), remote, now_millis())?)
    }

    async fn remove(&self, entity: &str, local_id: &str) -> Result<Option<Record>> {
        let mut store = self.inner.lock().await;
        Ok(store.remove(entity, local_id)?)
    }
}
