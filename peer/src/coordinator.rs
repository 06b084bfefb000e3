//! Per-entity reconciliation between the local store and one remote.
//!
//! The local store is always written first and is the caller's source of
//! truth. Remote calls are opportunistic:
//!
//! - read paths fail open to the local data ([`SyncCoordinator::refresh`])
//! - write paths succeed once the local write lands; remote failures are
//!   logged and the record stays pending for the next [`SyncCoordinator::sync_up`]
//!
//! Every method takes `Option<&RemoteEndpoint>`; `None` is explicit offline
//! mode and no remote call is attempted.

use crate::remote::{RemoteClient, RemoteError};
use crate::store::{LocalStore, StoreError};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tether_engine::{
    plan_pull, plan_push, EntityName, EntitySchema, PushOp, Record, RemoteEndpoint, RemoteId,
    RemoteRecord, SyncState,
};

/// Errors from sync passes.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("No active remote endpoint")]
    Offline,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<tether_engine::Error> for SyncError {
    fn from(err: tether_engine::Error) -> Self {
        SyncError::Store(err.into())
    }
}

/// Outcome of a pull of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDownReport {
    /// Synced records removed because the remote no longer has them
    pub deleted: usize,
    /// Remote records written locally
    pub upserted: usize,
    /// Remote records left unapplied (pending local work, key clashes,
    /// unknown parents)
    pub skipped: usize,
}

/// Outcome of a push of one entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncUpReport {
    /// Records the remote accepted
    pub pushed: usize,
    /// Records the remote rejected or could not be reached for
    pub failed: usize,
    /// Child records waiting for their parent to be pushed
    pub deferred: usize,
}

/// Outcome of a full push-then-pull pass over every entity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncAllReport {
    pub up: SyncUpReport,
    pub down: SyncDownReport,
    /// Entities whose pass hit a remote failure
    pub failed_entities: Vec<EntityName>,
}

/// Result of pushing one record.
#[derive(Debug)]
enum PushOutcome {
    Pushed(Record),
    Deferred,
    Failed(RemoteError),
}

/// Reconciles entity types between a [`LocalStore`] and a remote endpoint.
#[derive(Debug)]
pub struct SyncCoordinator<S> {
    store: Arc<S>,
    client: RemoteClient,
}

impl<S> Clone for SyncCoordinator<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            client: self.client.clone(),
        }
    }
}

impl<S: LocalStore> SyncCoordinator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_client(store, RemoteClient::new())
    }

    pub fn with_client(store: Arc<S>, client: RemoteClient) -> Self {
        Self { store, client }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    fn entity_schema(&self, entity: &str) -> Result<EntitySchema, StoreError> {
        Ok(self.store.schema().entity(entity)?.clone())
    }

    /// Pull one entity type from the remote.
    ///
    /// A remote failure aborts the pull before anything is written.
    pub async fn sync_down(
        &self,
        entity: &str,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<SyncDownReport, SyncError> {
        let remote = remote.ok_or(SyncError::Offline)?;
        let schema = self.entity_schema(entity)?;

        let fetched = self.client.fetch_all(remote, entity).await?;
        let fetched_count = fetched.len();

        // Recompute natural keys locally and map parent links to local ids
        let mut incoming = Vec::with_capacity(fetched.len());
        let mut unresolved: HashSet<RemoteId> = HashSet::new();
        for record in fetched {
            match self.localize(&schema, record).await? {
                Ok(record) => incoming.push(record),
                Err(remote_id) => {
                    unresolved.insert(remote_id);
                }
            }
        }

        let local = self.store.list(entity).await?;
        let mut plan = plan_pull(&local, &incoming);

        // Children we could not resolve are still present remotely
        if !unresolved.is_empty() {
            plan.deletions.retain(|local_id| {
                local
                    .iter()
                    .find(|r| &r.local_id == local_id)
                    .and_then(Record::remote_id)
                    .map_or(true, |remote_id| !unresolved.contains(remote_id))
            });
        }

        let mut report = SyncDownReport {
            skipped: plan.skipped.len() + unresolved.len(),
            ..Default::default()
        };

        for local_id in &plan.deletions {
            if self.store.remove(entity, local_id).await?.is_some() {
                report.deleted += 1;
            }
        }

        for upsert in &plan.upserts {
            match self
                .store
                .upsert_remote(entity, upsert.local_id.as_deref(), &upsert.record)
                .await
            {
                Ok(_) => report.upserted += 1,
                Err(e) if e.is_duplicate_key() => {
                    tracing::warn!(
                        entity,
                        remote_id = %upsert.record.id,
                        "Skipping remote record: {}",
                        e
                    );
                    report.skipped += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::info!(
            entity,
            endpoint = %remote.id,
            fetched = fetched_count,
            deleted = report.deleted,
            upserted = report.upserted,
            skipped = report.skipped,
            "Pulled entity"
        );

        Ok(report)
    }

    /// Read an entity's records, refreshing from the remote first when one
    /// is active. Remote failures fall back to the local data.
    pub async fn refresh(
        &self,
        entity: &str,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<Vec<Record>, StoreError> {
        if remote.is_some() {
            match self.sync_down(entity, remote).await {
                Ok(_) => {}
                Err(SyncError::Store(e)) => return Err(e),
                Err(e) => tracing::warn!(entity, "Refresh failed, serving local data: {}", e),
            }
        }
        self.store.list(entity).await
    }

    /// Push every pending record of an entity type.
    ///
    /// Each record is independent: one failure neither blocks nor rolls
    /// back the others.
    pub async fn sync_up(
        &self,
        entity: &str,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<SyncUpReport, SyncError> {
        let remote = remote.ok_or(SyncError::Offline)?;
        let schema = self.entity_schema(entity)?;

        let pending = self.store.pending(entity).await?;
        let ops = plan_push(&pending);

        let mut report = SyncUpReport::default();
        for op in ops {
            let local_id = op.local_id().clone();
            match self.push(&schema, remote, op).await? {
                PushOutcome::Pushed(_) => report.pushed += 1,
                PushOutcome::Deferred => report.deferred += 1,
                PushOutcome::Failed(e) => {
                    log_push_failure(entity, &local_id, &e);
                    report.failed += 1;
                }
            }
        }

        if report != SyncUpReport::default() {
            tracing::info!(
                entity,
                endpoint = %remote.id,
                pushed = report.pushed,
                failed = report.failed,
                deferred = report.deferred,
                "Pushed entity"
            );
        }

        Ok(report)
    }

    /// Create a record.
    ///
    /// A `local-only` record already holding the payload's natural key is
    /// returned unchanged, so retrying a create never duplicates it. Only a
    /// local storage failure is returned as an error.
    pub async fn create(
        &self,
        entity: &str,
        payload: serde_json::Value,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<Record, StoreError> {
        let schema = self.entity_schema(entity)?;
        let natural_key = schema.validate_payload(&payload)?;

        if let Some(key) = &natural_key {
            if let Some(existing) = self.store.find_by_natural_key(entity, key).await? {
                if existing.sync_state == SyncState::LocalOnly {
                    tracing::debug!(
                        entity,
                        local_id = %existing.local_id,
                        natural_key = %key,
                        "Duplicate create suppressed"
                    );
                    return Ok(existing);
                }
            }
        }

        let record = self.store.create(entity, payload).await?;

        let Some(remote) = remote else {
            return Ok(record);
        };
        let op = PushOp::Create(tether_engine::CreateOp {
            local_id: record.local_id.clone(),
            payload: record.payload.clone(),
            version: record.version,
        });
        self.push_or_log(&schema, remote, op, record).await
    }

    /// Update a record locally, then on the remote if it has a remote id.
    pub async fn update(
        &self,
        entity: &str,
        local_id: &str,
        payload: serde_json::Value,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<Record, StoreError> {
        let schema = self.entity_schema(entity)?;
        let record = self.store.update(entity, local_id, payload).await?;

        let (Some(remote), Some(remote_id)) = (remote, record.remote_id()) else {
            return Ok(record);
        };
        let op = PushOp::Update(tether_engine::UpdateOp {
            local_id: record.local_id.clone(),
            remote_id: remote_id.clone(),
            payload: record.payload.clone(),
            version: record.version,
        });
        self.push_or_log(&schema, remote, op, record).await
    }

    /// Delete a record locally, then best-effort on the remote.
    ///
    /// A remote failure never restores the local record.
    pub async fn delete(
        &self,
        entity: &str,
        local_id: &str,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<Option<Record>, StoreError> {
        let removed = self.store.remove(entity, local_id).await?;

        if let (Some(record), Some(remote)) = (&removed, remote) {
            if let Some(remote_id) = record.remote_id() {
                if let Err(e) = self.client.delete(remote, entity, remote_id).await {
                    tracing::warn!(
                        entity,
                        local_id,
                        remote_id = %remote_id,
                        "Remote delete failed: {}",
                        e
                    );
                }
            }
        }

        Ok(removed)
    }

    /// Push then pull every entity type, parents first.
    ///
    /// A remote failure on one entity is logged and the pass moves on; a
    /// local storage failure stops it.
    pub async fn sync_all(
        &self,
        remote: Option<&RemoteEndpoint>,
    ) -> Result<SyncAllReport, SyncError> {
        let remote = remote.ok_or(SyncError::Offline)?;
        let mut report = SyncAllReport::default();

        for entity in self.store.schema().sync_order() {
            let pass = async {
                let up = self.sync_up(&entity, Some(remote)).await?;
                let down = self.sync_down(&entity, Some(remote)).await?;
                Ok::<_, SyncError>((up, down))
            };

            match pass.await {
                Ok((up, down)) => {
                    report.up.pushed += up.pushed;
                    report.up.failed += up.failed;
                    report.up.deferred += up.deferred;
                    report.down.deleted += down.deleted;
                    report.down.upserted += down.upserted;
                    report.down.skipped += down.skipped;
                }
                Err(SyncError::Remote(e)) => {
                    tracing::warn!(entity = %entity, "Sync failed: {}", e);
                    report.failed_entities.push(entity.clone());
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    async fn push_or_log(
        &self,
        schema: &EntitySchema,
        remote: &RemoteEndpoint,
        op: PushOp,
        record: Record,
    ) -> Result<Record, StoreError> {
        let entity = schema.name.as_str();
        match self.push(schema, remote, op).await? {
            PushOutcome::Pushed(record) => Ok(record),
            PushOutcome::Deferred => {
                tracing::debug!(
                    entity,
                    local_id = %record.local_id,
                    "Parent not synced yet, push deferred"
                );
                Ok(record)
            }
            PushOutcome::Failed(e) => {
                log_push_failure(entity, &record.local_id, &e);
                Ok(record)
            }
        }
    }

    /// Send one operation and promote the record on success.
    async fn push(
        &self,
        schema: &EntitySchema,
        remote: &RemoteEndpoint,
        mut op: PushOp,
    ) -> Result<PushOutcome, StoreError> {
        if !self.remotize(schema, op.payload_mut()).await? {
            return Ok(PushOutcome::Deferred);
        }

        let entity = schema.name.as_str();
        let result = match &op {
            PushOp::Create(create) => self.client.create(remote, entity, &create.payload).await,
            PushOp::Update(update) => self
                .client
                .update(remote, entity, &update.remote_id, &update.payload)
                .await
                .map(|_| update.remote_id.clone()),
        };

        match result {
            Ok(remote_id) => {
                let record = self
                    .store
                    .mark_synced(entity, op.local_id(), &remote_id, op.version())
                    .await?;
                Ok(PushOutcome::Pushed(record))
            }
            Err(e) => Ok(PushOutcome::Failed(e)),
        }
    }

    /// Rewrite a child's parent link from the parent's local id to its
    /// remote id. Returns false when the parent has no remote id yet.
    async fn remotize(
        &self,
        schema: &EntitySchema,
        payload: &mut serde_json::Value,
    ) -> Result<bool, StoreError> {
        let Some(link) = &schema.parent else {
            return Ok(true);
        };
        let Some(parent_id) = schema.parent_id_of(payload).map(str::to_string) else {
            return Ok(false);
        };

        let parent = self.store.get(&link.entity, &parent_id).await?;
        match parent.as_ref().and_then(Record::remote_id) {
            Some(remote_id) => {
                payload[link.field.as_str()] = serde_json::Value::String(remote_id.clone());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Prepare a fetched record for planning: recompute its natural key
    /// with the local schema and rewrite its parent link to the parent's
    /// local id. Yields the remote id when the parent is unknown locally.
    async fn localize(
        &self,
        schema: &EntitySchema,
        mut record: RemoteRecord,
    ) -> Result<std::result::Result<RemoteRecord, RemoteId>, StoreError> {
        record.natural_key = schema.natural_key_of(&record.payload).unwrap_or(None);

        let Some(link) = &schema.parent else {
            return Ok(Ok(record));
        };
        let Some(parent_remote_id) = schema.parent_id_of(&record.payload).map(str::to_string)
        else {
            return Ok(Err(record.id));
        };

        match self
            .store
            .find_by_remote_id(&link.entity, &parent_remote_id)
            .await?
        {
            Some(parent) => {
                record.payload[link.field.as_str()] = serde_json::Value::String(parent.local_id);
                Ok(Ok(record))
            }
            None => {
                tracing::debug!(
                    entity = %schema.name,
                    remote_id = %record.id,
                    parent = %parent_remote_id,
                    "Parent unknown locally, skipping remote record"
                );
                Ok(Err(record.id))
            }
        }
    }
}

/// Unreachable remotes log at info, rejections at warn.
fn log_push_failure(entity: &str, local_id: &str, err: &RemoteError) {
    if err.is_unreachable() {
        tracing::info!(entity, local_id, "Remote unreachable, record left pending: {}", err);
    } else {
        tracing::warn!(entity, local_id, "Remote rejected write, record left pending: {}", err);
    }
}
