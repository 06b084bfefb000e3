//! Store - the in-memory record container.
//!
//! The Store holds every local record grouped by entity and keeps a natural
//! key index per entity so duplicate creation is rejected before it lands.

use crate::{
    error::Result, EntityName, Error, LocalId, NaturalKey, Record, RemoteRecord, Schema,
    Timestamp, Version,
};
use std::collections::HashMap;

/// All records of one entity type.
#[derive(Debug, Clone, Default)]
pub struct Collection {
    records: HashMap<LocalId, Record>,
    natural_keys: HashMap<NaturalKey, LocalId>,
}

impl Collection {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self {
            records: HashMap::new(),
            natural_keys: HashMap::new(),
        }
    }

    /// Get a record by local ID.
    pub fn get(&self, id: &str) -> Option<&Record> {
        self.records.get(id)
    }

    /// Find the record holding a natural key.
    pub fn find_by_natural_key(&self, key: &str) -> Option<&Record> {
        self.natural_keys
            .get(key)
            .and_then(|id| self.records.get(id))
    }

    /// Find the record a remote knows under `remote_id`.
    pub fn find_by_remote_id(&self, remote_id: &str) -> Option<&Record> {
        self.records
            .values()
            .find(|r| r.remote_id().map(String::as_str) == Some(remote_id))
    }

    /// All records, oldest first.
    pub fn records(&self) -> Vec<&Record> {
        let mut records: Vec<&Record> = self.records.values().collect();
        records.sort_by(|a, b| {
            a.metadata
                .created_at
                .cmp(&b.metadata.created_at)
                .then_with(|| a.local_id.cmp(&b.local_id))
        });
        records
    }

    /// Count of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if collection is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_key_free(&self, entity: &str, key: Option<&str>, owner: Option<&str>) -> Result<()> {
        let Some(key) = key else {
            return Ok(());
        };
        match self.natural_keys.get(key) {
            Some(holder) if Some(holder.as_str()) != owner => Err(Error::DuplicateNaturalKey {
                entity: entity.to_string(),
                key: key.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Insert or replace a record, keeping the natural key index current.
    fn put(&mut self, record: Record) {
        if let Some(previous) = self.records.get(&record.local_id) {
            if let Some(old_key) = &previous.natural_key {
                self.natural_keys.remove(old_key);
            }
        }
        if let Some(key) = &record.natural_key {
            self.natural_keys
                .insert(key.clone(), record.local_id.clone());
        }
        self.records.insert(record.local_id.clone(), record);
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        let record = self.records.remove(id)?;
        if let Some(key) = &record.natural_key {
            self.natural_keys.remove(key);
        }
        Some(record)
    }
}

/// The main store holding all local records.
#[derive(Debug, Clone)]
pub struct Store {
    /// Schema for validation and natural keys
    schema: Schema,
    /// Collections by entity name
    collections: HashMap<EntityName, Collection>,
}

impl Store {
    /// Create a new store with an empty collection per schema entity.
    pub fn new(schema: Schema) -> Self {
        let collections = schema
            .entities
            .keys()
            .map(|name| (name.clone(), Collection::new()))
            .collect();

        Self {
            schema,
            collections,
        }
    }

    /// Get the schema.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Get a collection by entity name.
    pub fn collection(&self, entity: &str) -> Option<&Collection> {
        self.collections.get(entity)
    }

    fn collection_mut(&mut self, entity: &str) -> Result<&mut Collection> {
        self.collections
            .get_mut(entity)
            .ok_or_else(|| Error::EntityNotFound(entity.to_string()))
    }

    fn existing(&self, entity: &str) -> Result<&Collection> {
        self.collections
            .get(entity)
            .ok_or_else(|| Error::EntityNotFound(entity.to_string()))
    }

    /// Write a new local-only record.
    ///
    /// Fails with [`Error::DuplicateNaturalKey`] when another record of the
    /// entity already holds the payload's natural key.
    pub fn create(
        &mut self,
        entity: &str,
        local_id: impl Into<LocalId>,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Result<Record> {
        let natural_key = self.schema.entity(entity)?.validate_payload(&payload)?;
        let local_id = local_id.into();

        let collection = self.collection_mut(entity)?;
        if collection.records.contains_key(&local_id) {
            return Err(Error::RecordAlreadyExists(local_id));
        }
        collection.ensure_key_free(entity, natural_key.as_deref(), None)?;

        let record = Record::new_local(local_id, entity, natural_key, payload, timestamp);
        collection.put(record.clone());
        Ok(record)
    }

    /// Get a record by entity and local ID.
    pub fn get(&self, entity: &str, local_id: &str) -> Option<&Record> {
        self.collections.get(entity).and_then(|c| c.get(local_id))
    }

    /// All records of an entity, oldest first.
    pub fn list(&self, entity: &str) -> Result<Vec<&Record>> {
        Ok(self.existing(entity)?.records())
    }

    /// Records of an entity carrying local work the remote has not seen.
    pub fn pending(&self, entity: &str) -> Result<Vec<&Record>> {
        Ok(self
            .existing(entity)?
            .records()
            .into_iter()
            .filter(|r| r.is_pending())
            .collect())
    }

    /// Find a record by natural key.
    pub fn find_by_natural_key(&self, entity: &str, key: &str) -> Option<&Record> {
        self.collections
            .get(entity)
            .and_then(|c| c.find_by_natural_key(key))
    }

    /// Find a record by the id a remote assigned to it.
    pub fn find_by_remote_id(&self, entity: &str, remote_id: &str) -> Option<&Record> {
        self.collections
            .get(entity)
            .and_then(|c| c.find_by_remote_id(remote_id))
    }

    /// Apply a local edit (full payload replacement).
    pub fn update(
        &mut self,
        entity: &str,
        local_id: &str,
        payload: serde_json::Value,
        timestamp: Timestamp,
    ) -> Result<Record> {
        let natural_key = self.schema.entity(entity)?.validate_payload(&payload)?;

        let collection = self.collection_mut(entity)?;
        let mut record = collection
            .get(local_id)
            .cloned()
            .ok_or_else(|| Error::RecordNotFound(local_id.to_string()))?;
        collection.ensure_key_free(entity, natural_key.as_deref(), Some(local_id))?;

        record.update_payload(payload, natural_key, timestamp);
        collection.put(record.clone());
        Ok(record)
    }

    /// Record a successful push of `pushed_version`.
    pub fn mark_synced(
        &mut self,
        entity: &str,
        local_id: &str,
        remote_id: &str,
        pushed_version: Version,
        timestamp: Timestamp,
    ) -> Result<Record> {
        let collection = self.collection_mut(entity)?;
        let mut record = collection
            .get(local_id)
            .cloned()
            .ok_or_else(|| Error::RecordNotFound(local_id.to_string()))?;
        record.mark_synced(remote_id, pushed_version, timestamp);
        collection.put(record.clone());
        Ok(record)
    }

    /// Write a remote copy as a synced record.
    ///
    /// With `existing` the named local record is overwritten; otherwise a new
    /// record is created under `new_local_id`.
    pub fn upsert_remote(
        &mut self,
        entity: &str,
        existing: Option<&str>,
        new_local_id: impl Into<LocalId>,
        remote: &RemoteRecord,
        timestamp: Timestamp,
    ) -> Result<Record> {
        let collection = self.collection_mut(entity)?;
        let owner = existing
            .map(str::to_string)
            .or_else(|| collection.find_by_remote_id(&remote.id).map(|r| r.local_id.clone()));
        collection.ensure_key_free(entity, remote.natural_key.as_deref(), owner.as_deref())?;

        let record = match owner {
            Some(local_id) => {
                let mut record = collection
                    .get(&local_id)
                    .cloned()
                    .ok_or(Error::RecordNotFound(local_id))?;
                record.apply_remote(remote, timestamp);
                record
            }
            None => Record::from_remote(new_local_id, entity, remote, timestamp),
        };
        collection.put(record.clone());
        Ok(record)
    }

    /// Remove a record unconditionally.
    pub fn remove(&mut self, entity: &str, local_id: &str) -> Result<Option<Record>> {
        Ok(self.collection_mut(entity)?.remove(local_id))
    }

    /// Insert a fully formed record, e.g. one loaded from storage.
    pub fn insert(&mut self, record: Record) -> Result<()> {
        let entity = record.entity.clone();
        let collection = self.collection_mut(&entity)?;
        collection.ensure_key_free(
            &entity,
            record.natural_key.as_deref(),
            Some(&record.local_id),
        )?;
        collection.put(record);
        Ok(())
    }

    /// Total number of records across entities.
    pub fn record_count(&self) -> usize {
        self.collections.values().map(Collection::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SyncState;
    use serde_json::json;

    fn test_store() -> Store {
        Store::new(Schema::workshop())
    }

    #[test]
    fn create_store() {
        let store = test_store();
        assert!(store.collection("repairs").is_some());
        assert!(store.collection("invoices").is_none());
        assert_eq!(store.record_count(), 0);
    }

    #[test]
    fn create_record() {
        let mut store = test_store();

        let record = store
            .create("repairs", "l-1", json!({"receiptId": 1042}), 1000)
            .unwrap();

        assert_eq!(record.natural_key.as_deref(), Some("1042"));
        assert_eq!(record.sync_state, SyncState::LocalOnly);
        assert_eq!(
            store.find_by_natural_key("repairs", "1042").unwrap().local_id,
            "l-1"
        );
    }

    #[test]
    fn create_duplicate_natural_key() {
        let mut store = test_store();
        store
            .create("repairs", "l-1", json!({"receiptId": 1042}), 1000)
            .unwrap();

        let result = store.create("repairs", "l-2", json!({"receiptId": "1042"}), 2000);
        assert!(matches!(result, Err(Error::DuplicateNaturalKey { .. })));

        // Same key in another entity is fine
        store
            .create("finance", "l-3", json!({"reference": "1042"}), 2000)
            .unwrap();
    }

    #[test]
    fn create_in_unknown_entity() {
        let mut store = test_store();
        let result = store.create("invoices", "l-1", json!({}), 1000);
        assert!(matches!(result, Err(Error::EntityNotFound(_))));
    }

    #[test]
    fn update_moves_natural_key() {
        let mut store = test_store();
        store
            .create("products", "l-1", json!({"barcode": "A"}), 1000)
            .unwrap();

        store
            .update("products", "l-1", json!({"barcode": "B"}), 2000)
            .unwrap();

        assert!(store.find_by_natural_key("products", "A").is_none());
        assert_eq!(
            store.find_by_natural_key("products", "B").unwrap().local_id,
            "l-1"
        );

        // The freed key can be taken again
        store
            .create("products", "l-2", json!({"barcode": "A"}), 3000)
            .unwrap();
    }

    #[test]
    fn update_cannot_steal_natural_key() {
        let mut store = test_store();
        store
            .create("products", "l-1", json!({"barcode": "A"}), 1000)
            .unwrap();
        store
            .create("products", "l-2", json!({"barcode": "B"}), 1000)
            .unwrap();

        let result = store.update("products", "l-2", json!({"barcode": "A"}), 2000);
        assert!(matches!(result, Err(Error::DuplicateNaturalKey { .. })));
    }

    #[test]
    fn update_missing_record() {
        let mut store = test_store();
        let result = store.update("clients", "nope", json!({}), 1000);
        assert!(matches!(result, Err(Error::RecordNotFound(_))));
    }

    #[test]
    fn pending_tracking() {
        let mut store = test_store();
        store
            .create("clients", "l-1", json!({"phone": "1"}), 1000)
            .unwrap();
        store
            .create("clients", "l-2", json!({"phone": "2"}), 2000)
            .unwrap();

        assert_eq!(store.pending("clients").unwrap().len(), 2);

        store.mark_synced("clients", "l-1", "r-1", 1, 3000).unwrap();
        let pending = store.pending("clients").unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].local_id, "l-2");

        store
            .update("clients", "l-1", json!({"phone": "1", "name": "Ann"}), 4000)
            .unwrap();
        assert_eq!(store.pending("clients").unwrap().len(), 2);
        assert_eq!(
            store.get("clients", "l-1").unwrap().sync_state,
            SyncState::Dirty {
                remote_id: "r-1".into()
            }
        );
    }

    #[test]
    fn upsert_remote_inserts_and_overwrites() {
        let mut store = test_store();
        let remote = RemoteRecord::new("r-1", Some("555".into()), json!({"phone": "555"}));

        let inserted = store
            .upsert_remote("clients", None, "l-1", &remote, 1000)
            .unwrap();
        assert_eq!(inserted.local_id, "l-1");
        assert_eq!(inserted.remote_id().map(String::as_str), Some("r-1"));

        let changed = RemoteRecord::new(
            "r-1",
            Some("555".into()),
            json!({"phone": "555", "name": "Bo"}),
        );
        // No existing id given: located by remote id, not duplicated
        let updated = store
            .upsert_remote("clients", None, "l-ignored", &changed, 2000)
            .unwrap();
        assert_eq!(updated.local_id, "l-1");
        assert_eq!(store.list("clients").unwrap().len(), 1);
        assert_eq!(updated.payload["name"], "Bo");
    }

    #[test]
    fn upsert_remote_respects_natural_keys() {
        let mut store = test_store();
        store
            .create("clients", "l-1", json!({"phone": "555"}), 1000)
            .unwrap();

        let remote = RemoteRecord::new("r-9", Some("555".into()), json!({"phone": "555"}));
        let result = store.upsert_remote("clients", None, "l-2", &remote, 2000);
        assert!(matches!(result, Err(Error::DuplicateNaturalKey { .. })));
    }

    #[test]
    fn remove_record() {
        let mut store = test_store();
        store
            .create("executors", "l-1", json!({"name": "Ivan"}), 1000)
            .unwrap();

        let removed = store.remove("executors", "l-1").unwrap();
        assert!(removed.is_some());
        assert!(store.get("executors", "l-1").is_none());
        assert!(store.find_by_natural_key("executors", "Ivan").is_none());
        assert!(store.remove("executors", "l-1").unwrap().is_none());
    }

    #[test]
    fn list_is_ordered_by_creation() {
        let mut store = test_store();
        store
            .create("counterparties", "b", json!({"name": "Second"}), 2000)
            .unwrap();
        store
            .create("counterparties", "a", json!({"name": "First"}), 1000)
            .unwrap();

        let ids: Vec<_> = store
            .list("counterparties")
            .unwrap()
            .iter()
            .map(|r| r.local_id.clone())
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
