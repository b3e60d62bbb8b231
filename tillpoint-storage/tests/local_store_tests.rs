use chrono::{Duration, Utc};
use serde_json::json;
use tillpoint_storage::LocalStore;
use tillpoint_types::{
    ConflictKind, MergeRule, MergeStrategy, Operation, OperationKind, QueueConfig, QueueItem,
    QueueItemStatus, QueuePayload, RecordId, ResolutionStrategy, RuleScope, SyncConflict,
    SyncRecord, SyncStatus,
};

fn store() -> LocalStore {
    LocalStore::open_in_memory().unwrap()
}

fn sample_record(table: &str, priority: u8) -> SyncRecord {
    SyncRecord::new(
        table,
        RecordId::new(),
        Operation::Update,
        OperationKind::Order,
        json!({"status": "ready"}),
    )
    .with_priority(priority)
}

// ── Domain records ───────────────────────────────────────────────

#[test]
fn put_get_delete_record() {
    let store = store();
    let id = RecordId::new();
    let data = json!({"id": id.to_string(), "name": "Latte", "price": 4.5});

    store.put_record("products", &id, &data, Utc::now()).unwrap();
    assert_eq!(store.get_record("products", &id).unwrap(), Some(data));

    assert!(store.delete_record("products", &id).unwrap());
    assert_eq!(store.get_record("products", &id).unwrap(), None);
    assert!(!store.delete_record("products", &id).unwrap());
}

#[test]
fn put_record_overwrites() {
    let store = store();
    let id = RecordId::new();
    store
        .put_record("products", &id, &json!({"price": 4.5}), Utc::now())
        .unwrap();
    store
        .put_record("products", &id, &json!({"price": 5.0}), Utc::now())
        .unwrap();
    assert_eq!(
        store.get_record("products", &id).unwrap(),
        Some(json!({"price": 5.0}))
    );
    assert_eq!(store.count_records("products").unwrap(), 1);
}

#[test]
fn records_are_scoped_by_table() {
    let store = store();
    let id = RecordId::new();
    store
        .put_record("products", &id, &json!({"kind": "product"}), Utc::now())
        .unwrap();
    assert_eq!(store.get_record("orders", &id).unwrap(), None);
}

#[test]
fn records_in_lists_a_table() {
    let store = store();
    for i in 0..3 {
        store
            .put_record("categories", &RecordId::new(), &json!({"sort_order": i}), Utc::now())
            .unwrap();
    }
    assert_eq!(store.records_in("categories").unwrap().len(), 3);
    assert!(store.records_in("products").unwrap().is_empty());
}

#[test]
fn records_matching_filters_on_a_field() {
    let store = store();
    let order = RecordId::new();
    store
        .put_record("orders", &order, &json!({"status": "ready"}), Utc::now())
        .unwrap();
    store
        .put_record(
            "orders",
            &RecordId::new(),
            &json!({"status": "completed"}),
            Utc::now(),
        )
        .unwrap();
    let payment_order = order.to_string();
    store
        .put_record(
            "payments",
            &RecordId::new(),
            &json!({"order_id": payment_order, "amount": 4.5}),
            Utc::now(),
        )
        .unwrap();

    let ready = store
        .records_matching("orders", "status", &json!("ready"))
        .unwrap();
    assert_eq!(ready.len(), 1);
    assert_eq!(ready[0].0, order);

    let for_order = store
        .records_matching("payments", "order_id", &json!(order.to_string()))
        .unwrap();
    assert_eq!(for_order.len(), 1);
}

#[test]
fn update_record_applies_closure_atomically() {
    let store = store();
    let id = RecordId::new();
    store
        .put_record("inventory", &id, &json!({"current_stock": 10}), Utc::now())
        .unwrap();

    let updated = store
        .update_record("inventory", &id, Utc::now(), |current| {
            let mut value = current.unwrap();
            let stock = value["current_stock"].as_i64().unwrap();
            value["current_stock"] = json!(stock - 3);
            value
        })
        .unwrap();

    assert_eq!(updated["current_stock"], json!(7));
    assert_eq!(
        store.get_record("inventory", &id).unwrap().unwrap()["current_stock"],
        json!(7)
    );
}

#[test]
fn update_record_creates_when_absent() {
    let store = store();
    let id = RecordId::new();
    store
        .update_record("inventory", &id, Utc::now(), |current| {
            assert!(current.is_none());
            json!({"current_stock": 5})
        })
        .unwrap();
    assert!(store.get_record("inventory", &id).unwrap().is_some());
}

#[test]
fn replace_table_overwrites_wholesale() {
    let store = store();
    let stale = RecordId::new();
    store
        .put_record("products", &stale, &json!({"name": "old"}), Utc::now())
        .unwrap();

    let fresh: Vec<(RecordId, serde_json::Value)> = (0..2)
        .map(|i| (RecordId::new(), json!({"name": format!("p{i}")})))
        .collect();
    let n = store.replace_table("products", &fresh, Utc::now()).unwrap();

    assert_eq!(n, 2);
    assert_eq!(store.count_records("products").unwrap(), 2);
    assert_eq!(store.get_record("products", &stale).unwrap(), None);
}

// ── Sync records ─────────────────────────────────────────────────

#[test]
fn sync_record_roundtrip() {
    let store = store();
    let record = sample_record("orders", 2);
    store.save_sync_record(&record).unwrap();
    assert_eq!(store.get_sync_record(&record.id).unwrap(), Some(record));
}

#[test]
fn pending_sync_records_ordered_by_priority_then_age() {
    let store = store();
    let low = sample_record("orders", 4);
    std::thread::sleep(std::time::Duration::from_millis(2));
    let critical = sample_record("payments", 1);
    std::thread::sleep(std::time::Duration::from_millis(2));
    let normal = sample_record("orders", 3);

    for record in [&low, &critical, &normal] {
        store.save_sync_record(record).unwrap();
    }

    let pending = store.pending_sync_records().unwrap();
    let ids: Vec<_> = pending.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![critical.id, normal.id, low.id]);
}

#[test]
fn completed_records_leave_the_pending_pool() {
    let store = store();
    let mut record = sample_record("orders", 3);
    store.save_sync_record(&record).unwrap();
    assert_eq!(store.pending_sync_record_count().unwrap(), 1);

    record.mark_syncing();
    record.mark_completed();
    store.save_sync_record(&record).unwrap();
    assert_eq!(store.pending_sync_record_count().unwrap(), 0);
    assert_eq!(
        store.sync_records_with_status(SyncStatus::Completed).unwrap().len(),
        1
    );
}

#[test]
fn purge_completed_respects_retention() {
    let store = store();
    let mut old = sample_record("orders", 3);
    old.created_at = Utc::now() - Duration::days(10);
    old.mark_completed();
    store.save_sync_record(&old).unwrap();

    let mut recent = sample_record("orders", 3);
    recent.mark_completed();
    store.save_sync_record(&recent).unwrap();

    let mut pending_but_old = sample_record("orders", 3);
    pending_but_old.created_at = Utc::now() - Duration::days(10);
    store.save_sync_record(&pending_but_old).unwrap();

    let purged = store
        .purge_completed_sync_records(Utc::now() - Duration::days(7))
        .unwrap();
    assert_eq!(purged, 1);
    // The old-but-pending record survives; only completed ones are collected.
    assert!(store.get_sync_record(&pending_but_old.id).unwrap().is_some());
    assert!(store.get_sync_record(&recent.id).unwrap().is_some());
    assert!(store.get_sync_record(&old.id).unwrap().is_none());
}

// ── Queue state ──────────────────────────────────────────────────

#[test]
fn queue_config_roundtrip() {
    let store = store();
    let config = QueueConfig::new(1, 100);
    store.save_queue_config("critical", &config).unwrap();

    let configs = store.load_queue_configs().unwrap();
    assert_eq!(configs, vec![("critical".to_string(), config)]);
}

#[test]
fn queue_items_roundtrip_and_clear() {
    let store = store();
    let item = QueueItem::new(
        "normal",
        QueuePayload::Record(sample_record("orders", 3)),
        3,
        3,
    );
    store.save_queue_item(&item).unwrap();
    assert_eq!(store.get_queue_item(&item.id).unwrap(), Some(item.clone()));
    assert_eq!(store.load_queue_items().unwrap().len(), 1);

    assert_eq!(store.clear_queue_items("normal").unwrap(), 1);
    assert!(store.load_queue_items().unwrap().is_empty());
}

#[test]
fn queue_item_status_is_updatable() {
    let store = store();
    let mut item = QueueItem::new(
        "normal",
        QueuePayload::Record(sample_record("orders", 3)),
        3,
        3,
    );
    store.save_queue_item(&item).unwrap();

    item.status = QueueItemStatus::Failed;
    item.error = Some("gave up".to_string());
    store.save_queue_item(&item).unwrap();

    let loaded = store.get_queue_item(&item.id).unwrap().unwrap();
    assert_eq!(loaded.status, QueueItemStatus::Failed);
    assert_eq!(loaded.error.as_deref(), Some("gave up"));
}

// ── Conflicts ────────────────────────────────────────────────────

fn sample_conflict() -> SyncConflict {
    SyncConflict::new(
        sample_record("orders", 3).id,
        "orders",
        RecordId::new(),
        json!({"status": "ready"}),
        json!({"status": "completed"}),
        ConflictKind::ConcurrentEdit,
        ResolutionStrategy::Merge,
    )
}

#[test]
fn conflict_roundtrip() {
    let store = store();
    let conflict = sample_conflict();
    store.save_conflict(&conflict).unwrap();
    assert_eq!(store.get_conflict(&conflict.id).unwrap(), Some(conflict));
}

#[test]
fn purge_only_removes_resolved_conflicts() {
    let store = store();

    let mut resolved = sample_conflict();
    resolved.created_at = Utc::now() - Duration::days(60);
    resolved.resolve(json!({"status": "completed"}), "merge");
    store.save_conflict(&resolved).unwrap();

    let mut unresolved = sample_conflict();
    unresolved.created_at = Utc::now() - Duration::days(60);
    store.save_conflict(&unresolved).unwrap();

    let purged = store
        .purge_resolved_conflicts(Utc::now() - Duration::days(30))
        .unwrap();
    assert_eq!(purged, 1);
    assert!(store.get_conflict(&unresolved.id).unwrap().is_some());
    assert_eq!(store.load_conflicts().unwrap().len(), 1);
}

// ── Merge rules ──────────────────────────────────────────────────

#[test]
fn merge_rule_roundtrip_and_replace() {
    let store = store();
    let rule = MergeRule::for_table("orders", "status", MergeStrategy::NewestWins, 1);
    store.save_merge_rule(&rule).unwrap();

    // Re-saving the same (scope, field) replaces rather than duplicates.
    let replacement = MergeRule::for_table("orders", "status", MergeStrategy::LocalWins, 2);
    store.save_merge_rule(&replacement).unwrap();

    let rules = store.load_merge_rules().unwrap();
    assert_eq!(rules, vec![replacement]);
}

#[test]
fn remove_merge_rule() {
    let store = store();
    let rule = MergeRule::for_any("updated_at", MergeStrategy::NewestWins, 1);
    store.save_merge_rule(&rule).unwrap();

    assert!(store.remove_merge_rule(&RuleScope::Any, "updated_at").unwrap());
    assert!(!store.remove_merge_rule(&RuleScope::Any, "updated_at").unwrap());
    assert!(store.load_merge_rules().unwrap().is_empty());
}

// ── Metadata ─────────────────────────────────────────────────────

#[test]
fn metadata_roundtrip() {
    let store = store();
    assert_eq!(store.get_metadata("last_sync").unwrap(), None);

    store.set_metadata("last_sync", "2026-08-06T10:00:00Z").unwrap();
    assert_eq!(
        store.get_metadata("last_sync").unwrap().as_deref(),
        Some("2026-08-06T10:00:00Z")
    );

    store.set_metadata("last_sync", "2026-08-06T11:00:00Z").unwrap();
    assert_eq!(
        store.get_metadata("last_sync").unwrap().as_deref(),
        Some("2026-08-06T11:00:00Z")
    );
}

// ── Persistence across reopen ────────────────────────────────────

#[test]
fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("till.db");
    let path = path.to_str().unwrap();

    let record = sample_record("orders", 2);
    let item = QueueItem::new("high", QueuePayload::Record(record.clone()), 2, 3);
    let rule = MergeRule::for_table("inventory", "current_stock", MergeStrategy::Custom, 1)
        .with_resolver("conservative_stock");

    {
        let store = LocalStore::open(path).unwrap();
        store.save_sync_record(&record).unwrap();
        store.save_queue_item(&item).unwrap();
        store.save_queue_config("high", &QueueConfig::new(2, 200)).unwrap();
        store.save_merge_rule(&rule).unwrap();
        store.set_metadata("last_sync", "never").unwrap();
    }

    let reopened = LocalStore::open(path).unwrap();
    assert_eq!(reopened.get_sync_record(&record.id).unwrap(), Some(record));
    assert_eq!(reopened.get_queue_item(&item.id).unwrap(), Some(item));
    assert_eq!(reopened.load_queue_configs().unwrap().len(), 1);
    assert_eq!(reopened.load_merge_rules().unwrap(), vec![rule]);
    assert_eq!(reopened.get_metadata("last_sync").unwrap().as_deref(), Some("never"));
}
