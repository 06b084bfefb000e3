//! Behaviour shared by every LocalStore implementation.

use serde_json::json;
use tempfile::TempDir;
use tether_engine::{Error, RemoteRecord, Schema, SyncState};
use tether_peer::{LocalStore, MemoryStore, SqliteStore, StoreError};

async fn sqlite_store(dir: &TempDir) -> SqliteStore {
    let url = format!("sqlite://{}?mode=rwc", dir.path().join("test.db").display());
    SqliteStore::open(&url, Schema::workshop()).await.unwrap()
}

fn is_duplicate(result: &Result<impl std::fmt::Debug, StoreError>) -> bool {
    matches!(result, Err(e) if e.is_duplicate_key())
}

// ============================================================================
// Shared checks
// ============================================================================

async fn create_and_lookup(store: &impl LocalStore) {
    let record = store
        .create("repairs", json!({"receiptId": 1042}))
        .await
        .unwrap();

    assert_eq!(record.sync_state, SyncState::LocalOnly);
    assert_eq!(record.version, 1);
    assert_eq!(record.natural_key.as_deref(), Some("1042"));

    let by_key = store
        .find_by_natural_key("repairs", "1042")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(by_key.local_id, record.local_id);

    let duplicate = store.create("repairs", json!({"receiptId": "1042"})).await;
    assert!(is_duplicate(&duplicate));

    assert!(matches!(
        store.create("invoices", json!({})).await,
        Err(StoreError::Engine(Error::EntityNotFound(_)))
    ));
    assert!(matches!(
        store.create("repairs", json!([1, 2])).await,
        Err(StoreError::Engine(Error::InvalidPayload(_)))
    ));
}

async fn sync_lifecycle(store: &impl LocalStore) {
    let record = store
        .create("clients", json!({"phone": "+1", "name": "Ann"}))
        .await
        .unwrap();
    assert_eq!(store.pending("clients").await.unwrap().len(), 1);

    let synced = store
        .mark_synced("clients", &record.local_id, "r-1", record.version)
        .await
        .unwrap();
    assert_eq!(
        synced.sync_state,
        SyncState::Synced {
            remote_id: "r-1".into()
        }
    );
    assert!(store.pending("clients").await.unwrap().is_empty());
    assert_eq!(
        store
            .find_by_remote_id("clients", "r-1")
            .await
            .unwrap()
            .unwrap()
            .local_id,
        record.local_id
    );

    let edited = store
        .update("clients", &record.local_id, json!({"phone": "+1", "name": "Bob"}))
        .await
        .unwrap();
    assert_eq!(
        edited.sync_state,
        SyncState::Dirty {
            remote_id: "r-1".into()
        }
    );
    assert!(edited.version > synced.version);

    // A push of an older version leaves the newer edit pending
    let stale = store
        .mark_synced("clients", &record.local_id, "r-1", synced.version)
        .await
        .unwrap();
    assert!(matches!(stale.sync_state, SyncState::Dirty { .. }));
}

async fn remote_upserts(store: &impl LocalStore) {
    let remote = RemoteRecord::new("r-9", Some("123".into()), json!({"barcode": "123", "qty": 1}));
    let inserted = store.upsert_remote("products", None, &remote).await.unwrap();
    assert_eq!(inserted.natural_key.as_deref(), Some("123"));

    let remote = RemoteRecord::new("r-9", Some("123".into()), json!({"barcode": "123", "qty": 5}));
    let overwritten = store.upsert_remote("products", None, &remote).await.unwrap();
    assert_eq!(overwritten.local_id, inserted.local_id);
    assert_eq!(overwritten.payload["qty"], 5);
    assert_eq!(store.list("products").await.unwrap().len(), 1);

    let removed = store
        .remove("products", &inserted.local_id)
        .await
        .unwrap();
    assert!(removed.is_some());
    assert!(store
        .remove("products", &inserted.local_id)
        .await
        .unwrap()
        .is_none());
}

async fn update_rules(store: &impl LocalStore) {
    let a = store
        .create("executors", json!({"name": "Ivan"}))
        .await
        .unwrap();
    let b = store
        .create("executors", json!({"name": "Olga"}))
        .await
        .unwrap();

    let taken = store
        .update("executors", &b.local_id, json!({"name": "Ivan"}))
        .await;
    assert!(is_duplicate(&taken));

    // Keeping its own key is fine
    store
        .update("executors", &a.local_id, json!({"name": "Ivan", "rate": 3}))
        .await
        .unwrap();

    assert!(matches!(
        store.update("executors", "missing", json!({"name": "X"})).await,
        Err(StoreError::Engine(Error::RecordNotFound(_)))
    ));
}

async fn list_returns_all(store: &impl LocalStore) {
    let mut ids = Vec::new();
    for i in 0..5 {
        let record = store
            .create("finance", json!({"reference": format!("ref-{i}")}))
            .await
            .unwrap();
        ids.push(record.local_id);
    }

    let listed: Vec<String> = store
        .list("finance")
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.local_id)
        .collect();
    let mut expected = ids.clone();
    expected.sort();
    let mut sorted_listed = listed.clone();
    sorted_listed.sort();
    assert_eq!(sorted_listed, expected);
    assert_eq!(listed.len(), 5);
}

async fn conformance(store: &impl LocalStore) {
    create_and_lookup(store).await;
    sync_lifecycle(store).await;
    remote_upserts(store).await;
    update_rules(store).await;
    list_returns_all(store).await;
}

// ============================================================================
// Implementations
// ============================================================================

#[tokio::test]
async fn memory_store_conformance() {
    conformance(&MemoryStore::new(Schema::workshop())).await;
}

#[tokio::test]
async fn sqlite_store_conformance() {
    let dir = TempDir::new().unwrap();
    conformance(&sqlite_store(&dir).await).await;
}

#[tokio::test]
async fn sqlite_in_memory_conformance() {
    let store = SqliteStore::open("sqlite::memory:", Schema::workshop())
        .await
        .unwrap();
    conformance(&store).await;
}
