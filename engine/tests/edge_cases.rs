//! Edge case tests for tether-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::json;
use tether_engine::{
    plan_pull, plan_push, EndpointSet, Error, PushOp, Record, RemoteEndpoint, RemoteRecord,
    Schema, SkipReason, Store, SyncState,
};

/// Apply a pull plan the way a caller would: deletions first, then upserts.
fn apply_pull(store: &mut Store, entity: &str, remote: &[RemoteRecord], timestamp: u64) {
    let local: Vec<Record> = store
        .list(entity)
        .unwrap()
        .into_iter()
        .cloned()
        .collect();
    let plan = plan_pull(&local, remote);

    for local_id in &plan.deletions {
        store.remove(entity, local_id).unwrap();
    }
    for (i, upsert) in plan.upserts.iter().enumerate() {
        store
            .upsert_remote(
                entity,
                upsert.local_id.as_deref(),
                format!("pulled_{}_{}", timestamp, i),
                &upsert.record,
                timestamp,
            )
            .unwrap();
    }
}

// ============================================================================
// Natural Key Edge Cases
// ============================================================================

#[test]
fn unicode_natural_keys() {
    let mut store = Store::new(Schema::workshop());

    let names = vec!["Иванов", "日本語", "🔧 Fixer", "Hello\tWorld"];
    for (i, name) in names.iter().enumerate() {
        let record = store
            .create("executors", format!("e_{}", i), json!({"name": name}), 1000)
            .unwrap();
        assert_eq!(record.natural_key.as_deref(), Some(*name));
    }

    let found = store.find_by_natural_key("executors", "🔧 Fixer").unwrap();
    assert_eq!(found.local_id, "e_2");
}

#[test]
fn numeric_and_string_keys_collide() {
    let mut store = Store::new(Schema::workshop());
    store
        .create("repairs", "r1", json!({"receiptId": 1042}), 1000)
        .unwrap();

    let result = store.create("repairs", "r2", json!({"receiptId": "1042"}), 1000);
    assert!(matches!(result, Err(Error::DuplicateNaturalKey { .. })));
}

#[test]
fn large_numeric_keys() {
    let mut store = Store::new(Schema::workshop());

    let record = store
        .create("products", "p1", json!({"barcode": 4_006_381_333_931u64}), 1000)
        .unwrap();
    assert_eq!(record.natural_key.as_deref(), Some("4006381333931"));
}

#[test]
fn same_key_in_different_entities() {
    let mut store = Store::new(Schema::workshop());

    store
        .create("executors", "e1", json!({"name": "Acme"}), 1000)
        .unwrap();
    store
        .create("counterparties", "c1", json!({"name": "Acme"}), 1000)
        .unwrap();

    assert_eq!(store.record_count(), 2);
}

#[test]
fn records_without_natural_key_never_collide() {
    let mut store = Store::new(Schema::workshop());

    for i in 0..3 {
        store
            .create("repairs", format!("r_{}", i), json!({"device": "Phone"}), 1000)
            .unwrap();
    }
    assert_eq!(store.list("repairs").unwrap().len(), 3);
}

#[test]
fn update_can_release_natural_key() {
    let mut store = Store::new(Schema::workshop());
    store
        .create("clients", "c1", json!({"phone": "+100"}), 1000)
        .unwrap();

    store
        .update("clients", "c1", json!({"phone": "+200"}), 2000)
        .unwrap();

    assert!(store.find_by_natural_key("clients", "+100").is_none());
    store
        .create("clients", "c2", json!({"phone": "+100"}), 3000)
        .unwrap();
}

// ============================================================================
// Pull Reconciliation Edge Cases
// ============================================================================

#[test]
fn pull_into_empty_store() {
    let mut store = Store::new(Schema::workshop());
    let remote = vec![
        RemoteRecord::new("x1", Some("+1".into()), json!({"phone": "+1"})),
        RemoteRecord::new("x2", Some("+2".into()), json!({"phone": "+2"})),
    ];

    apply_pull(&mut store, "clients", &remote, 1000);

    let records = store.list("clients").unwrap();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| !r.is_pending()));
}

#[test]
fn empty_remote_keeps_pending_work() {
    let mut store = Store::new(Schema::workshop());
    store
        .create("repairs", "offline", json!({"receiptId": 1}), 1000)
        .unwrap();
    let synced = store
        .create("repairs", "pushed", json!({"receiptId": 2}), 1000)
        .unwrap();
    store
        .mark_synced("repairs", "pushed", "x2", synced.version, 1500)
        .unwrap();

    apply_pull(&mut store, "repairs", &[], 2000);

    let records = store.list("repairs").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_id, "offline");
    assert_eq!(records[0].sync_state, SyncState::LocalOnly);
}

#[test]
fn repeated_pulls_are_stable() {
    let mut store = Store::new(Schema::workshop());
    let remote = vec![RemoteRecord::new(
        "x1",
        Some("1042".into()),
        json!({"receiptId": 1042}),
    )];

    apply_pull(&mut store, "repairs", &remote, 1000);
    apply_pull(&mut store, "repairs", &remote, 2000);
    apply_pull(&mut store, "repairs", &remote, 3000);

    let records = store.list("repairs").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].local_id, "pulled_1000_0");
    assert_eq!(records[0].remote_id().map(String::as_str), Some("x1"));
}

#[test]
fn remote_edit_overwrites_synced_record() {
    let mut store = Store::new(Schema::workshop());
    apply_pull(
        &mut store,
        "products",
        &[RemoteRecord::new("x1", Some("111".into()), json!({"barcode": "111", "qty": 1}))],
        1000,
    );

    apply_pull(
        &mut store,
        "products",
        &[RemoteRecord::new("x1", Some("111".into()), json!({"barcode": "111", "qty": 5}))],
        2000,
    );

    let record = store.find_by_remote_id("products", "x1").unwrap();
    assert_eq!(record.payload["qty"], 5);
}

#[test]
fn dirty_record_survives_remote_edit() {
    let mut store = Store::new(Schema::workshop());
    apply_pull(
        &mut store,
        "products",
        &[RemoteRecord::new("x1", Some("111".into()), json!({"barcode": "111", "qty": 1}))],
        1000,
    );
    let local_id = store.find_by_remote_id("products", "x1").unwrap().local_id.clone();
    store
        .update("products", &local_id, json!({"barcode": "111", "qty": 2}), 1500)
        .unwrap();

    let local: Vec<Record> = store.list("products").unwrap().into_iter().cloned().collect();
    let remote = vec![RemoteRecord::new(
        "x1",
        Some("111".into()),
        json!({"barcode": "111", "qty": 9}),
    )];
    let plan = plan_pull(&local, &remote);

    assert!(plan.is_noop());
    assert_eq!(plan.skipped[0].reason, SkipReason::PendingLocalEdit);
    assert_eq!(store.get("products", &local_id).unwrap().payload["qty"], 2);
}

#[test]
fn remote_record_matching_offline_key_is_skipped() {
    let mut store = Store::new(Schema::workshop());
    store
        .create("repairs", "offline", json!({"receiptId": 1042, "device": "Mine"}), 1000)
        .unwrap();

    apply_pull(
        &mut store,
        "repairs",
        &[RemoteRecord::new("x1", Some("1042".into()), json!({"receiptId": 1042}))],
        2000,
    );

    let records = store.list("repairs").unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].payload["device"], "Mine");
}

// ============================================================================
// Push Edge Cases
// ============================================================================

#[test]
fn push_plan_for_many_pending_records() {
    let mut store = Store::new(Schema::workshop());
    for i in 0..1000u64 {
        store
            .create("repairs", format!("r_{:04}", i), json!({"receiptId": i}), 1000)
            .unwrap();
    }

    let ops = plan_push(store.pending("repairs").unwrap());

    assert_eq!(ops.len(), 1000);
    assert_eq!(ops[0].local_id(), "r_0000");
    assert!(ops.iter().all(|op| matches!(op, PushOp::Create(_))));
}

#[test]
fn rapid_edits_during_push() {
    let mut store = Store::new(Schema::workshop());
    store
        .create("clients", "c1", json!({"phone": "+1", "name": "A"}), 1000)
        .unwrap();

    let ops = plan_push(store.pending("clients").unwrap());
    let pushed_version = ops[0].version();

    for i in 0..10 {
        store
            .update("clients", "c1", json!({"phone": "+1", "name": format!("A{}", i)}), 1100 + i)
            .unwrap();
    }
    let record = store
        .mark_synced("clients", "c1", "x1", pushed_version, 2000)
        .unwrap();

    assert!(record.is_pending());
    let ops = plan_push(store.pending("clients").unwrap());
    assert!(matches!(&ops[0], PushOp::Update(op) if op.remote_id == "x1"));
    assert_eq!(ops[0].payload()["name"], "A9");
}

// ============================================================================
// Endpoint Edge Cases
// ============================================================================

#[test]
fn activating_unknown_endpoint_changes_nothing() {
    let mut set = EndpointSet::new();
    set.add(
        RemoteEndpoint::new("a", "Shop", "http://10.0.0.1:8787")
            .unwrap()
            .active(),
    )
    .unwrap();

    assert!(set.activate("missing").is_err());
    assert_eq!(set.active().unwrap().id, "a");
}

#[test]
fn endpoint_ids_with_special_characters() {
    let mut set = EndpointSet::new();
    let ids = ["with space", "with/slash", "юникод"];
    for (i, id) in ids.iter().enumerate() {
        set.add(RemoteEndpoint::new(*id, "x", &format!("http://10.0.0.{}:8787", i + 1)).unwrap())
            .unwrap();
    }

    set.activate("with/slash").unwrap();
    assert_eq!(set.active().unwrap().id, "with/slash");
}
