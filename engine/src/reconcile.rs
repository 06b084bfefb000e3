//! Reconciliation planning for pull and push passes.
//!
//! Planning is pure: given the local records of one entity and the records
//! fetched from the remote, it decides what to delete, what to overwrite
//! and what to leave alone. Callers apply the plan one record at a time.
//!
//! # Pull rules
//!
//! 1. A local `synced` record whose remote id is absent remotely is deleted.
//!    `local-only` and `dirty` records are never deleted by a pull.
//! 2. A remote record matching a `synced` local record (by remote id)
//!    overwrites it.
//! 3. A remote record matching pending local work, by remote id or by
//!    natural key, is skipped: local edits win until pushed.
//! 4. A remote record whose natural key is held by another synced record
//!    that survives the pull is skipped.
//! 5. Everything else is inserted as a new synced record.

use crate::{
    operation::{CreateOp, UpdateOp},
    LocalId, NaturalKey, PushOp, Record, RemoteId, RemoteRecord, SyncState,
};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Why a fetched remote record was not written locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SkipReason {
    /// A local record with unpushed edits matches it
    PendingLocalEdit,
    /// Another local record already holds its natural key
    NaturalKeyTaken,
    /// The remote sent the same id twice
    DuplicateRemoteId,
}

/// A remote record left unapplied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Skipped {
    pub remote_id: RemoteId,
    /// The local record that blocked it, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    pub reason: SkipReason,
}

/// A remote record to write locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Upsert {
    /// Local record to overwrite; `None` inserts a new record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<LocalId>,
    pub record: RemoteRecord,
}

/// Result of pull planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PullPlan {
    /// Synced local records no longer present remotely
    pub deletions: Vec<LocalId>,
    /// Remote records to write, applied after deletions
    pub upserts: Vec<Upsert>,
    pub skipped: Vec<Skipped>,
}

impl PullPlan {
    /// Whether applying the plan changes nothing.
    pub fn is_noop(&self) -> bool {
        self.deletions.is_empty() && self.upserts.is_empty()
    }
}

/// Plan a pull of one entity type.
pub fn plan_pull(local: &[Record], remote: &[RemoteRecord]) -> PullPlan {
    let mut plan = PullPlan::default();

    let remote_ids: HashSet<&str> = remote.iter().map(|r| r.id.as_str()).collect();

    let mut by_remote_id: HashMap<&str, &Record> = HashMap::new();
    let mut by_natural_key: HashMap<&str, &Record> = HashMap::new();
    for record in local {
        if let Some(remote_id) = record.remote_id() {
            by_remote_id.insert(remote_id.as_str(), record);
        }
        if let Some(key) = &record.natural_key {
            by_natural_key.insert(key.as_str(), record);
        }
    }

    // Rule 1
    let mut deleted: HashSet<&str> = HashSet::new();
    for record in local {
        if let SyncState::Synced { remote_id } = &record.sync_state {
            if !remote_ids.contains(remote_id.as_str()) {
                plan.deletions.push(record.local_id.clone());
                deleted.insert(record.local_id.as_str());
            }
        }
    }

    let mut seen: HashSet<&str> = HashSet::new();
    let mut claimed_keys: HashSet<&NaturalKey> = HashSet::new();

    for incoming in remote {
        if !seen.insert(incoming.id.as_str()) {
            plan.skipped.push(skip(incoming, None, SkipReason::DuplicateRemoteId));
            continue;
        }

        // Rules 2 and 3, matched by remote id
        if let Some(existing) = by_remote_id.get(incoming.id.as_str()) {
            if existing.is_pending() {
                plan.skipped.push(skip(
                    incoming,
                    Some(existing),
                    SkipReason::PendingLocalEdit,
                ));
                continue;
            }
            if let Some(key) = &incoming.natural_key {
                if let Some(holder) = by_natural_key.get(key.as_str()) {
                    if holder.local_id != existing.local_id
                        && !deleted.contains(holder.local_id.as_str())
                    {
                        let reason = if holder.is_pending() {
                            SkipReason::PendingLocalEdit
                        } else {
                            SkipReason::NaturalKeyTaken
                        };
                        plan.skipped.push(skip(incoming, Some(holder), reason));
                        continue;
                    }
                }
                if !claimed_keys.insert(key) {
                    plan.skipped
                        .push(skip(incoming, Some(existing), SkipReason::NaturalKeyTaken));
                    continue;
                }
            }
            plan.upserts.push(Upsert {
                local_id: Some(existing.local_id.clone()),
                record: incoming.clone(),
            });
            continue;
        }

        // Rules 3 and 4, matched by natural key
        if let Some(key) = &incoming.natural_key {
            if let Some(holder) = by_natural_key.get(key.as_str()) {
                if holder.is_pending() {
                    plan.skipped.push(skip(
                        incoming,
                        Some(holder),
                        SkipReason::PendingLocalEdit,
                    ));
                    continue;
                }
                if !deleted.contains(holder.local_id.as_str()) {
                    plan.skipped
                        .push(skip(incoming, Some(holder), SkipReason::NaturalKeyTaken));
                    continue;
                }
            }
            if !claimed_keys.insert(key) {
                plan.skipped
                    .push(skip(incoming, None, SkipReason::NaturalKeyTaken));
                continue;
            }
        }

        // Rule 5
        plan.upserts.push(Upsert {
            local_id: None,
            record: incoming.clone(),
        });
    }

    plan
}

fn skip(incoming: &RemoteRecord, local: Option<&Record>, reason: SkipReason) -> Skipped {
    Skipped {
        remote_id: incoming.id.clone(),
        local_id: local.map(|r| r.local_id.clone()),
        reason,
    }
}

/// Plan a push of one entity type: one operation per pending record,
/// oldest first.
pub fn plan_push<'a>(records: impl IntoIterator<Item = &'a Record>) -> Vec<PushOp> {
    let mut pending: Vec<&Record> = records.into_iter().filter(|r| r.is_pending()).collect();
    pending.sort_by(|a, b| {
        a.metadata
            .created_at
            .cmp(&b.metadata.created_at)
            .then_with(|| a.local_id.cmp(&b.local_id))
    });

    pending
        .into_iter()
        .filter_map(|record| match &record.sync_state {
            SyncState::LocalOnly => Some(PushOp::Create(CreateOp {
                local_id: record.local_id.clone(),
                payload: record.payload.clone(),
                version: record.version,
            })),
            SyncState::Dirty { remote_id } => Some(PushOp::Update(UpdateOp {
                local_id: record.local_id.clone(),
                remote_id: remote_id.clone(),
                payload: record.payload.clone(),
                version: record.version,
            })),
            SyncState::Synced { .. } => None,
        })
        .collect()
}
