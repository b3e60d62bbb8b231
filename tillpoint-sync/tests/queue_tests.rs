use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tillpoint_storage::LocalStore;
use tillpoint_sync::handlers_mock::RecordingHandlers;
use tillpoint_sync::remote_mock::MockRemoteStore;
use tillpoint_sync::{EventBus, LogNotifier, SyncError, SyncEvent, SyncQueues};
use tillpoint_types::{
    Operation, OperationKind, QueueConfig, QueueItemStatus, QueuePayload, RecordId, SyncRecord,
    SyncStatus,
};

struct Harness {
    queues: SyncQueues,
    remote: Arc<MockRemoteStore>,
    handlers: Arc<RecordingHandlers>,
    store: Arc<LocalStore>,
    bus: EventBus,
}

fn harness() -> Harness {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let remote = Arc::new(MockRemoteStore::new());
    let handlers = Arc::new(RecordingHandlers::new());
    let bus = EventBus::new();
    let queues = SyncQueues::new(
        store.clone(),
        remote.clone(),
        handlers.clone(),
        Arc::new(LogNotifier),
        bus.clone(),
    )
    .unwrap();
    Harness {
        queues,
        remote,
        handlers,
        store,
        bus,
    }
}

fn record(priority: u8) -> SyncRecord {
    SyncRecord::new(
        "orders",
        RecordId::new(),
        Operation::Update,
        OperationKind::Order,
        json!({"status": "ready"}),
    )
    .with_priority(priority)
}

/// Drains repeatedly until `done` holds or the timeout passes.
async fn drain_until(queues: &SyncQueues, timeout: Duration, done: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        queues.drain_all().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        if done() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return done();
        }
    }
}

async fn settle(queues: &SyncQueues) {
    for _ in 0..5 {
        queues.drain_all().await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// ── Drain ordering ───────────────────────────────────────────────

#[tokio::test]
async fn drains_by_priority_then_enqueue_time() {
    let h = harness();
    h.queues.pause("normal").await.unwrap();

    let r3 = record(3);
    let r1 = record(1);
    let r2 = record(2);
    for r in [&r3, &r1, &r2] {
        tokio::time::sleep(Duration::from_millis(2)).await;
        h.queues
            .enqueue("normal", QueuePayload::Record(r.clone()), r.priority, None, Vec::new())
            .await
            .unwrap();
    }

    h.queues.resume("normal").await.unwrap();
    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || remote.uploads().len() == 3).await);

    let uploaded: Vec<RecordId> = h.remote.uploads().iter().map(|(_, id, _, _)| *id).collect();
    assert_eq!(uploaded, vec![r1.record_id, r2.record_id, r3.record_id]);
}

#[tokio::test]
async fn fifo_within_a_priority_tier() {
    let h = harness();
    h.queues.pause("normal").await.unwrap();

    let mut expected = Vec::new();
    for _ in 0..3 {
        tokio::time::sleep(Duration::from_millis(2)).await;
        let r = record(3);
        expected.push(r.record_id);
        h.queues
            .enqueue("normal", QueuePayload::Record(r), 3, None, Vec::new())
            .await
            .unwrap();
    }

    h.queues.resume("normal").await.unwrap();
    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || remote.uploads().len() == 3).await);

    let uploaded: Vec<RecordId> = h.remote.uploads().iter().map(|(_, id, _, _)| *id).collect();
    assert_eq!(uploaded, expected);
}

// ── Capacity ─────────────────────────────────────────────────────

#[tokio::test]
async fn full_queue_rejects_enqueue() {
    let h = harness();
    let mut config = QueueConfig::new(1, 2);
    config.paused = true;
    h.queues.create_queue("tiny", config).await.unwrap();

    for _ in 0..2 {
        h.queues
            .enqueue("tiny", QueuePayload::Record(record(1)), 1, None, Vec::new())
            .await
            .unwrap();
    }

    let err = h
        .queues
        .enqueue("tiny", QueuePayload::Record(record(1)), 1, None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::QueueFull { max_size: 2, .. }));
    assert_eq!(h.queues.current_size("tiny").await.unwrap(), 2);
}

#[tokio::test]
async fn unknown_queue_rejects_enqueue() {
    let h = harness();
    let err = h
        .queues
        .enqueue("nope", QueuePayload::Record(record(3)), 3, None, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::QueueNotFound(_)));
}

// ── Retry budget ─────────────────────────────────────────────────

#[tokio::test]
async fn exhausted_attempts_fail_permanently_then_manual_retry_works() {
    let h = harness();
    h.handlers.fail_next(10);

    let operation = tillpoint_types::OfflineOperation::new(
        OperationKind::Payment,
        RecordId::new(),
        json!({"amount": 9.5}),
    );
    let item = h.queues.enqueue_operation(operation, 3).await.unwrap();
    assert_eq!(item.max_attempts, 3);

    let store = h.store.clone();
    let id = item.id;
    assert!(
        drain_until(&h.queues, Duration::from_secs(15), || {
            store
                .get_queue_item(&id)
                .unwrap()
                .is_some_and(|i| i.status == QueueItemStatus::Failed)
        })
        .await
    );

    let failed = h.store.get_queue_item(&item.id).unwrap().unwrap();
    assert_eq!(failed.attempts, 3);
    assert!(h.handlers.applied().is_empty());

    // No fourth automatic attempt happens.
    settle(&h.queues).await;
    assert_eq!(h.store.get_queue_item(&item.id).unwrap().unwrap().attempts, 3);

    // A manual retry resets the budget and re-enters the queue.
    h.handlers.fail_next(0);
    let retried = h.queues.retry_item(&item.id).await.unwrap();
    assert_eq!(retried.attempts, 0);
    assert_eq!(retried.status, QueueItemStatus::Pending);

    let handlers = h.handlers.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || !handlers.applied().is_empty()).await);
    assert_eq!(h.handlers.applied()[0].0, OperationKind::Payment);
}

#[tokio::test]
async fn non_retriable_failure_skips_the_retry_budget() {
    let h = harness();
    h.remote.always_fail_with(400);

    let r = record(3);
    let item = h
        .queues
        .enqueue("normal", QueuePayload::Record(r.clone()), 3, None, Vec::new())
        .await
        .unwrap();

    let store = h.store.clone();
    let id = item.id;
    assert!(
        drain_until(&h.queues, Duration::from_secs(5), || {
            store
                .get_queue_item(&id)
                .unwrap()
                .is_some_and(|i| i.status == QueueItemStatus::Failed)
        })
        .await
    );

    let failed = h.store.get_queue_item(&item.id).unwrap().unwrap();
    assert_eq!(failed.attempts, 1);

    // The sync record was marked failed as well.
    let stored = h.store.get_sync_record(&r.id).unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Failed);
}

#[tokio::test]
async fn transient_failure_retries_and_succeeds() {
    let h = harness();
    h.remote.fail_next(1);

    let mut events = h.bus.subscribe();
    let r = record(3);
    h.queues
        .enqueue("normal", QueuePayload::Record(r.clone()), 3, None, Vec::new())
        .await
        .unwrap();

    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(10), || remote.uploads().len() == 1).await);

    let stored = h.store.get_sync_record(&r.id).unwrap().unwrap();
    assert_eq!(stored.status, SyncStatus::Completed);

    let mut saw_retry = false;
    let mut saw_completed = false;
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::ItemRetryScheduled { .. } => saw_retry = true,
            SyncEvent::ItemCompleted { .. } => saw_completed = true,
            _ => {}
        }
    }
    assert!(saw_retry);
    assert!(saw_completed);
}

// ── Scheduling & dependencies ────────────────────────────────────

#[tokio::test]
async fn scheduled_items_wait_for_their_time() {
    let h = harness();
    let r = record(3);
    h.queues
        .enqueue(
            "normal",
            QueuePayload::Record(r),
            3,
            Some(chrono::Utc::now() + chrono::Duration::milliseconds(500)),
            Vec::new(),
        )
        .await
        .unwrap();

    h.queues.drain_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.remote.uploads().is_empty());

    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(3), || remote.uploads().len() == 1).await);
}

#[tokio::test]
async fn unmet_dependencies_are_skipped_without_blocking_others() {
    let h = harness();

    // A is parked far in the future, so B's dependency on it stays unmet.
    let a = h
        .queues
        .enqueue(
            "normal",
            QueuePayload::Record(record(1)),
            1,
            Some(chrono::Utc::now() + chrono::Duration::minutes(10)),
            Vec::new(),
        )
        .await
        .unwrap();
    let b_record = record(2);
    h.queues
        .enqueue(
            "normal",
            QueuePayload::Record(b_record.clone()),
            2,
            None,
            vec![a.id],
        )
        .await
        .unwrap();
    let c_record = record(3);
    h.queues
        .enqueue("normal", QueuePayload::Record(c_record.clone()), 3, None, Vec::new())
        .await
        .unwrap();

    settle(&h.queues).await;

    let uploaded: Vec<RecordId> = h.remote.uploads().iter().map(|(_, id, _, _)| *id).collect();
    assert_eq!(uploaded, vec![c_record.record_id]);
    assert_eq!(h.queues.current_size("normal").await.unwrap(), 2);
}

#[tokio::test]
async fn completed_dependency_unblocks_dependent() {
    let h = harness();

    let a = h
        .queues
        .enqueue("normal", QueuePayload::Record(record(1)), 1, None, Vec::new())
        .await
        .unwrap();
    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || remote.uploads().len() == 1).await);

    let b = record(2);
    h.queues
        .enqueue("normal", QueuePayload::Record(b.clone()), 2, None, vec![a.id])
        .await
        .unwrap();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || remote.uploads().len() == 2).await);
}

// ── Pause / resume / clear ───────────────────────────────────────

#[tokio::test]
async fn paused_queue_accepts_but_does_not_process() {
    let h = harness();
    h.queues.pause("normal").await.unwrap();
    h.queues
        .enqueue("normal", QueuePayload::Record(record(3)), 3, None, Vec::new())
        .await
        .unwrap();

    settle(&h.queues).await;
    assert!(h.remote.uploads().is_empty());

    h.queues.resume("normal").await.unwrap();
    let remote = h.remote.clone();
    assert!(drain_until(&h.queues, Duration::from_secs(5), || remote.uploads().len() == 1).await);
}

#[tokio::test]
async fn clear_discards_and_reports_count() {
    let h = harness();
    let mut events = h.bus.subscribe();
    h.queues.pause("normal").await.unwrap();
    for _ in 0..3 {
        h.queues
            .enqueue("normal", QueuePayload::Record(record(3)), 3, None, Vec::new())
            .await
            .unwrap();
    }

    assert_eq!(h.queues.clear("normal").await.unwrap(), 3);
    assert_eq!(h.queues.current_size("normal").await.unwrap(), 0);
    assert!(h.store.load_queue_items().unwrap().is_empty());

    let mut saw_cleared = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::QueueCleared { discarded, .. } = event {
            assert_eq!(discarded, 3);
            saw_cleared = true;
        }
    }
    assert!(saw_cleared);
}

#[tokio::test]
async fn redeclaring_a_queue_keeps_items() {
    let h = harness();
    let mut config = QueueConfig::new(2, 10);
    config.paused = true;
    h.queues.create_queue("custom", config).await.unwrap();
    for _ in 0..2 {
        h.queues
            .enqueue("custom", QueuePayload::Record(record(2)), 2, None, Vec::new())
            .await
            .unwrap();
    }

    let mut bigger = QueueConfig::new(2, 50);
    bigger.paused = true;
    h.queues.create_queue("custom", bigger).await.unwrap();

    assert_eq!(h.queues.current_size("custom").await.unwrap(), 2);
    assert_eq!(h.queues.queue_status("custom").await.unwrap().max_size, 50);
}

// ── Inspection & persistence ─────────────────────────────────────

#[tokio::test]
async fn statistics_reflect_queue_contents() {
    let h = harness();
    h.queues.pause("high").await.unwrap();
    h.queues
        .enqueue("high", QueuePayload::Record(record(2)), 2, None, Vec::new())
        .await
        .unwrap();

    let stats = h.queues.statistics().await;
    assert_eq!(stats.total_queues, 5);
    assert_eq!(stats.total_items, 1);
    assert_eq!(stats.paused_queues, 1);
    // Queues come back ordered by priority: critical first.
    assert_eq!(stats.queues[0].name, "critical");
}

#[tokio::test]
async fn holds_record_tracks_queued_records() {
    let h = harness();
    h.queues.pause("normal").await.unwrap();
    let r = record(3);
    h.queues.enqueue_record(r.clone()).await.unwrap();

    assert!(h.queues.holds_record(&r.id).await);
    assert!(!h.queues.holds_record(&record(3).id).await);
}

#[tokio::test]
async fn enqueue_record_routes_by_priority() {
    let h = harness();
    for name in ["critical", "high", "normal", "low"] {
        h.queues.pause(name).await.unwrap();
    }
    h.queues.enqueue_record(record(1)).await.unwrap();
    h.queues.enqueue_record(record(2)).await.unwrap();
    h.queues.enqueue_record(record(3)).await.unwrap();
    h.queues.enqueue_record(record(7)).await.unwrap();

    assert_eq!(h.queues.current_size("critical").await.unwrap(), 1);
    assert_eq!(h.queues.current_size("high").await.unwrap(), 1);
    assert_eq!(h.queues.current_size("normal").await.unwrap(), 1);
    assert_eq!(h.queues.current_size("low").await.unwrap(), 1);
}

#[tokio::test]
async fn pending_items_survive_a_restart() {
    let store = Arc::new(LocalStore::open_in_memory().unwrap());
    let bus = EventBus::new();
    let remote = Arc::new(MockRemoteStore::new());
    let handlers = Arc::new(RecordingHandlers::new());

    let first = SyncQueues::new(
        store.clone(),
        remote.clone(),
        handlers.clone(),
        Arc::new(LogNotifier),
        bus.clone(),
    )
    .unwrap();
    first.pause("normal").await.unwrap();
    first
        .enqueue("normal", QueuePayload::Record(record(3)), 3, None, Vec::new())
        .await
        .unwrap();

    let second = SyncQueues::new(store, remote, handlers, Arc::new(LogNotifier), bus).unwrap();
    assert_eq!(second.current_size("normal").await.unwrap(), 1);
    // The paused flag was persisted with the queue definition.
    assert!(second.queue_status("normal").await.unwrap().paused);
}

#[tokio::test]
async fn retry_rejects_items_that_have_not_failed() {
    let h = harness();
    h.queues.pause("normal").await.unwrap();
    let item = h
        .queues
        .enqueue("normal", QueuePayload::Record(record(3)), 3, None, Vec::new())
        .await
        .unwrap();

    let err = h.queues.retry_item(&item.id).await.unwrap_err();
    assert!(matches!(err, SyncError::ItemNotFailed(_)));
}
