//! Record types and per-record synchronization state.

use crate::{error::Result, EntityName, Error, LocalId, NaturalKey, RemoteId, Timestamp, Version};
use serde::{Deserialize, Serialize};

/// Reconciliation status of a local record.
///
/// The remote id lives inside the tag: a record is either unknown to the
/// remote (`LocalOnly`) or carries the id the remote assigned to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "state",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum SyncState {
    /// Created or modified while disconnected, never confirmed remotely
    LocalOnly,
    /// Last known state matches the remote
    Synced { remote_id: RemoteId },
    /// Modified locally after having been synced
    Dirty { remote_id: RemoteId },
}

impl SyncState {
    /// The remote id, if the remote has ever accepted this record.
    pub fn remote_id(&self) -> Option<&RemoteId> {
        match self {
            SyncState::LocalOnly => None,
            SyncState::Synced { remote_id } | SyncState::Dirty { remote_id } => Some(remote_id),
        }
    }

    /// Whether the record carries local work the remote has not seen.
    pub fn is_pending(&self) -> bool {
        !matches!(self, SyncState::Synced { .. })
    }

    /// Short name used for storage columns and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncState::LocalOnly => "local-only",
            SyncState::Synced { .. } => "synced",
            SyncState::Dirty { .. } => "dirty",
        }
    }

    /// Rebuild a state from its storage columns.
    pub fn from_parts(state: &str, remote_id: Option<RemoteId>) -> Result<Self> {
        match (state, remote_id) {
            ("local-only", None) => Ok(SyncState::LocalOnly),
            ("synced", Some(remote_id)) => Ok(SyncState::Synced { remote_id }),
            ("dirty", Some(remote_id)) => Ok(SyncState::Dirty { remote_id }),
            (state, remote_id) => Err(Error::InvalidSyncState(format!(
                "{state} with remote id {remote_id:?}"
            ))),
        }
    }
}

/// Metadata associated with a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    /// When the record was first written locally (milliseconds since epoch)
    pub created_at: Timestamp,
    /// When the record was last written locally (milliseconds since epoch)
    pub updated_at: Timestamp,
}

impl Metadata {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            created_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn touch(&mut self, timestamp: Timestamp) {
        self.updated_at = timestamp;
    }
}

/// A business record held by the local store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Identifier assigned by the local store, stable for the record's life
    pub local_id: LocalId,
    /// Entity type this record belongs to
    pub entity: EntityName,
    /// Domain-unique value used to suppress duplicate creation
    pub natural_key: Option<NaturalKey>,
    /// Reconciliation status
    pub sync_state: SyncState,
    /// Incremented on every local write
    pub version: Version,
    /// Business payload (JSON object)
    pub payload: serde_json::Value,
    pub metadata: Metadata,
}

impl Record {
    /// A record written locally and never seen by a remote.
    pub fn new_local(
        local_id: impl Into<LocalId>,
        entity: impl Into<EntityName>,
        natural_key: Option<NaturalKey>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            entity: entity.into(),
            natural_key,
            sync_state: SyncState::LocalOnly,
            version: 1,
            payload,
            metadata: Metadata::new(timestamp),
        }
    }

    /// A record materialized from a remote copy.
    pub fn from_remote(
        local_id: impl Into<LocalId>,
        entity: impl Into<EntityName>,
        remote: &RemoteRecord,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            local_id: local_id.into(),
            entity: entity.into(),
            natural_key: remote.natural_key.clone(),
            sync_state: SyncState::Synced {
                remote_id: remote.id.clone(),
            },
            version: 1,
            payload: remote.payload.clone(),
            metadata: Metadata::new(timestamp),
        }
    }

    pub fn remote_id(&self) -> Option<&RemoteId> {
        self.sync_state.remote_id()
    }

    pub fn is_pending(&self) -> bool {
        self.sync_state.is_pending()
    }

    /// Apply a local edit. A synced record becomes dirty; pending records
    /// keep their state.
    pub fn update_payload(
        &mut self,
        payload: serde_json::Value,
        natural_key: Option<NaturalKey>,
        timestamp: Timestamp,
    ) {
        self.payload = payload;
        self.natural_key = natural_key;
        if let SyncState::Synced { remote_id } = &self.sync_state {
            self.sync_state = SyncState::Dirty {
                remote_id: remote_id.clone(),
            };
        }
        self.version += 1;
        self.metadata.touch(timestamp);
    }

    /// Record that the remote accepted the state pushed at `pushed_version`.
    ///
    /// If the record was edited again after that push it stays pending as
    /// `Dirty` so the newer edit is pushed on the next pass.
    pub fn mark_synced(
        &mut self,
        remote_id: impl Into<RemoteId>,
        pushed_version: Version,
        timestamp: Timestamp,
    ) {
        let remote_id = remote_id.into();
        self.sync_state = if self.version == pushed_version {
            SyncState::Synced { remote_id }
        } else {
            SyncState::Dirty { remote_id }
        };
        self.version += 1;
        self.metadata.touch(timestamp);
    }

    /// Overwrite this record with the remote copy.
    pub fn apply_remote(&mut self, remote: &RemoteRecord, timestamp: Timestamp) {
        self.payload = remote.payload.clone();
        self.natural_key = remote.natural_key.clone();
        self.sync_state = SyncState::Synced {
            remote_id: remote.id.clone(),
        };
        self.version += 1;
        self.metadata.touch(timestamp);
    }
}

/// A record as served by a remote endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    /// Identifier on the remote side
    pub id: RemoteId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<NaturalKey>,
    pub payload: serde_json::Value,
}

impl RemoteRecord {
    pub fn new(
        id: impl Into<RemoteId>,
        natural_key: Option<NaturalKey>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: id.into(),
            natural_key,
            payload,
        }
    }
}

impl From<&Record> for RemoteRecord {
    /// The view a peer serves of one of its own records.
    fn from(record: &Record) -> Self {
        Self {
            id: record.local_id.clone(),
            natural_key: record.natural_key.clone(),
            payload: record.payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn repair(receipt: u64) -> Record {
        Record::new_local(
            "local-1",
            "repairs",
            Some(receipt.to_string()),
            json!({"receiptId": receipt, "device": "Phone"}),
            1000,
        )
    }

    #[test]
    fn new_local_record_is_local_only() {
        let record = repair(1042);

        assert_eq!(record.sync_state, SyncState::LocalOnly);
        assert_eq!(record.remote_id(), None);
        assert_eq!(record.version, 1);
        assert!(record.is_pending());
    }

    #[test]
    fn editing_synced_record_makes_it_dirty() {
        let mut record = repair(1042);
        record.mark_synced("r-1", 1, 2000);
        assert_eq!(
            record.sync_state,
            SyncState::Synced {
                remote_id: "r-1".into()
            }
        );

        record.update_payload(json!({"receiptId": 1042, "device": "Tablet"}), Some("1042".into()), 3000);

        assert_eq!(
            record.sync_state,
            SyncState::Dirty {
                remote_id: "r-1".into()
            }
        );
        assert_eq!(record.metadata.updated_at, 3000);
    }

    #[test]
    fn editing_local_only_record_stays_local_only() {
        let mut record = repair(7);
        record.update_payload(json!({"receiptId": 7}), Some("7".into()), 2000);

        assert_eq!(record.sync_state, SyncState::LocalOnly);
        assert_eq!(record.version, 2);
    }

    #[test]
    fn stale_push_leaves_record_dirty() {
        let mut record = repair(7);
        let pushed = record.version;
        record.update_payload(json!({"receiptId": 7, "note": "late edit"}), Some("7".into()), 2000);

        record.mark_synced("r-7", pushed, 3000);

        assert_eq!(
            record.sync_state,
            SyncState::Dirty {
                remote_id: "r-7".into()
            }
        );
    }

    #[test]
    fn sync_state_storage_parts() {
        assert_eq!(
            SyncState::from_parts("local-only", None).unwrap(),
            SyncState::LocalOnly
        );
        assert_eq!(
            SyncState::from_parts("dirty", Some("x".into())).unwrap(),
            SyncState::Dirty {
                remote_id: "x".into()
            }
        );
        assert!(SyncState::from_parts("synced", None).is_err());
        assert!(SyncState::from_parts("local-only", Some("x".into())).is_err());
    }

    #[test]
    fn sync_state_serialization() {
        let state = SyncState::Synced {
            remote_id: "r-1".into(),
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json, json!({"state": "synced", "remoteId": "r-1"}));

        let json = serde_json::to_value(SyncState::LocalOnly).unwrap();
        assert_eq!(json, json!({"state": "local-only"}));
    }

    #[test]
    fn remote_view_uses_local_id() {
        let record = repair(1042);
        let remote = RemoteRecord::from(&record);

        assert_eq!(remote.id, "local-1");
        assert_eq!(remote.natural_key.as_deref(), Some("1042"));
    }
}
