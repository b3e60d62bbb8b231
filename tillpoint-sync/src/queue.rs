//! Priority sync queues.
//!
//! Work is admitted into named priority classes and drained subject to a
//! global concurrency cap, per-item scheduling gates and retry budgets.
//! Every item either completes, exhausts its attempts, or sits in an
//! explicitly paused queue — nothing is lost silently.
//!
//! Ordering within a queue is (priority ascending, enqueue time ascending)
//! with look-ahead: an item whose schedule gate has not elapsed or whose
//! dependencies are unmet is skipped over, not allowed to block the items
//! behind it. Across queues there is no preemption; a burst of low-priority
//! work can hold concurrency slots until they free up.

use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::handlers::DomainHandlers;
use crate::notify::{Notification, Notifier};
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tillpoint_storage::LocalStore;
use tillpoint_types::{
    OfflineOperation, OperationKind, QueueConfig, QueueItem, QueueItemId, QueueItemStatus,
    QueuePayload, SyncRecord,
};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Retry backoff table. Delays clamp at the last entry; attempts past the
/// table's length keep getting the cap (non-decreasing, bounded).
const RETRY_DELAYS: [Duration; 5] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(5),
    Duration::from_secs(10),
    Duration::from_secs(30),
];

/// Upper bound on the random jitter added to each retry delay.
const RETRY_JITTER_MS: u64 = 1000;

/// Background drain tick.
const DRAIN_INTERVAL: Duration = Duration::from_secs(5);

/// Global cap on concurrently in-flight items across all queues.
const MAX_CONCURRENT: usize = 3;

/// Computes the backoff delay for the given attempt number (1-based),
/// excluding jitter. Never below the queue's base retry delay.
#[must_use]
pub fn retry_delay(attempt: u32, base: Duration) -> Duration {
    let index = (attempt.saturating_sub(1) as usize).min(RETRY_DELAYS.len() - 1);
    RETRY_DELAYS[index].max(base)
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_JITTER_MS))
}

#[derive(Debug)]
struct QueueState {
    config: QueueConfig,
    /// Pending and retrying items, sorted by (priority, created_at).
    items: Vec<QueueItem>,
    /// Guards against two concurrent drains of the same queue.
    processing: bool,
    last_processed: Option<DateTime<Utc>>,
}

impl QueueState {
    fn new(config: QueueConfig) -> Self {
        Self {
            config,
            items: Vec::new(),
            processing: false,
            last_processed: None,
        }
    }

    fn sort_items(&mut self) {
        self.items
            .sort_by(|a, b| (a.priority, a.created_at).cmp(&(b.priority, b.created_at)));
    }
}

/// Snapshot of one queue's state.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatus {
    pub name: String,
    pub priority: u8,
    pub size: usize,
    pub max_size: usize,
    pub paused: bool,
    pub enabled: bool,
    pub processing: bool,
    pub last_processed: Option<DateTime<Utc>>,
}

/// Aggregate statistics across all queues.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueStatistics {
    pub total_queues: usize,
    pub total_items: usize,
    pub paused_queues: usize,
    pub in_flight: usize,
    pub queues: Vec<QueueStatus>,
}

/// The set of named priority queues and their drain machinery.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncQueues {
    queues: Arc<RwLock<HashMap<String, QueueState>>>,
    /// Items that have completed (for dependency resolution).
    completed: Arc<RwLock<HashSet<QueueItemId>>>,
    /// Items currently executing.
    in_flight: Arc<RwLock<HashSet<QueueItemId>>>,
    /// Items that failed permanently and await a manual retry.
    failed: Arc<RwLock<HashSet<QueueItemId>>>,
    semaphore: Arc<Semaphore>,
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    handlers: Arc<dyn DomainHandlers>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
    running: Arc<AtomicBool>,
    drain_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl SyncQueues {
    /// Creates the queue set with the default priority classes, then restores
    /// any persisted queue definitions and pending items from the store.
    pub fn new(
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        handlers: Arc<dyn DomainHandlers>,
        notifier: Arc<dyn Notifier>,
        bus: EventBus,
    ) -> SyncResult<Self> {
        let mut map = HashMap::new();
        for (name, priority, max_size) in [
            ("critical", 1, 100),
            ("high", 2, 200),
            ("normal", 3, 500),
            ("low", 4, 1000),
            ("batch", 5, 2000),
        ] {
            map.insert(
                name.to_string(),
                QueueState::new(QueueConfig::new(priority, max_size)),
            );
        }

        // Persisted definitions override the defaults.
        for (name, config) in store.load_queue_configs()? {
            map.entry(name)
                .and_modify(|state| state.config = config.clone())
                .or_insert_with(|| QueueState::new(config));
        }

        let mut failed = HashSet::new();
        for mut item in store.load_queue_items()? {
            match item.status {
                QueueItemStatus::Failed => {
                    failed.insert(item.id);
                }
                _ => {
                    // An item caught mid-flight by a crash goes back to pending.
                    if item.status == QueueItemStatus::Processing {
                        item.status = QueueItemStatus::Pending;
                    }
                    if let Some(state) = map.get_mut(&item.queue) {
                        state.items.push(item);
                    } else {
                        warn!("dropping item for unknown queue {}", item.queue);
                    }
                }
            }
        }
        for state in map.values_mut() {
            state.sort_items();
        }

        Ok(Self {
            queues: Arc::new(RwLock::new(map)),
            completed: Arc::new(RwLock::new(HashSet::new())),
            in_flight: Arc::new(RwLock::new(HashSet::new())),
            failed: Arc::new(RwLock::new(failed)),
            semaphore: Arc::new(Semaphore::new(MAX_CONCURRENT)),
            store,
            remote,
            handlers,
            notifier,
            bus,
            running: Arc::new(AtomicBool::new(false)),
            drain_task: Arc::new(StdMutex::new(None)),
        })
    }

    // ── Queue administration ─────────────────────────────────────

    /// Declares (or re-declares) a named queue. Re-declaring replaces the
    /// configuration but keeps the queue's items.
    pub async fn create_queue(&self, name: &str, config: QueueConfig) -> SyncResult<()> {
        {
            let mut queues = self.queues.write().await;
            queues
                .entry(name.to_string())
                .and_modify(|state| state.config = config.clone())
                .or_insert_with(|| QueueState::new(config.clone()));
        }
        self.store.save_queue_config(name, &config)?;
        info!(
            "declared queue {} (priority {}, max {})",
            name, config.priority, config.max_size
        );
        Ok(())
    }

    /// Pauses a queue. In-flight items finish; nothing new starts.
    pub async fn pause(&self, name: &str) -> SyncResult<()> {
        let config = {
            let mut queues = self.queues.write().await;
            let state = queues
                .get_mut(name)
                .ok_or_else(|| SyncError::QueueNotFound(name.to_string()))?;
            state.config.paused = true;
            state.config.clone()
        };
        self.store.save_queue_config(name, &config)?;
        info!("paused queue {}", name);
        self.bus.emit(SyncEvent::QueuePaused {
            queue: name.to_string(),
        });
        Ok(())
    }

    /// Resumes a queue and immediately attempts to drain it.
    pub async fn resume(&self, name: &str) -> SyncResult<()> {
        let config = {
            let mut queues = self.queues.write().await;
            let state = queues
                .get_mut(name)
                .ok_or_else(|| SyncError::QueueNotFound(name.to_string()))?;
            state.config.paused = false;
            state.config.clone()
        };
        self.store.save_queue_config(name, &config)?;
        info!("resumed queue {}", name);
        self.bus.emit(SyncEvent::QueueResumed {
            queue: name.to_string(),
        });
        self.spawn_drain(name);
        Ok(())
    }

    /// Discards all items in a queue. Data loss is explicit: the discarded
    /// count is returned and an event is emitted.
    pub async fn clear(&self, name: &str) -> SyncResult<usize> {
        let discarded = {
            let mut queues = self.queues.write().await;
            let state = queues
                .get_mut(name)
                .ok_or_else(|| SyncError::QueueNotFound(name.to_string()))?;
            let n = state.items.len();
            state.items.clear();
            n
        };
        self.store.clear_queue_items(name)?;
        info!("cleared {} items from queue {}", discarded, name);
        self.bus.emit(SyncEvent::QueueCleared {
            queue: name.to_string(),
            discarded,
        });
        Ok(discarded)
    }

    // ── Enqueue ──────────────────────────────────────────────────

    /// Admits a payload into the named queue. Fails with a capacity error if
    /// the queue is full; otherwise inserts in (priority, enqueue-time) order
    /// and triggers a drain if the queue is not paused.
    pub async fn enqueue(
        &self,
        queue: &str,
        payload: QueuePayload,
        priority: u8,
        scheduled_for: Option<DateTime<Utc>>,
        dependencies: Vec<QueueItemId>,
    ) -> SyncResult<QueueItem> {
        let (item, paused) = {
            let mut queues = self.queues.write().await;
            let state = queues
                .get_mut(queue)
                .ok_or_else(|| SyncError::QueueNotFound(queue.to_string()))?;

            if state.items.len() >= state.config.max_size {
                return Err(SyncError::QueueFull {
                    queue: queue.to_string(),
                    max_size: state.config.max_size,
                });
            }

            let mut item = QueueItem::new(queue, payload, priority, state.config.max_attempts);
            item.scheduled_for = scheduled_for;
            item.dependencies = dependencies;

            // Persisted before the lock drops so a drain can never observe an
            // item that would vanish on restart.
            self.store.save_queue_item(&item)?;

            state.items.push(item.clone());
            state.sort_items();
            (item, state.config.paused)
        };

        debug!("enqueued item {} into {} (priority {})", item.id, queue, priority);
        self.bus.emit(SyncEvent::ItemEnqueued {
            queue: queue.to_string(),
            item_id: item.id,
        });

        if !paused {
            self.spawn_drain(queue);
        }
        Ok(item)
    }

    /// Routes a sync record to the queue matching its priority.
    pub async fn enqueue_record(&self, record: SyncRecord) -> SyncResult<QueueItem> {
        let queue = queue_for_priority(record.priority);
        let priority = record.priority;
        self.enqueue(queue, QueuePayload::Record(record), priority, None, Vec::new())
            .await
    }

    /// Routes an offline operation to the queue matching the given priority.
    pub async fn enqueue_operation(
        &self,
        operation: OfflineOperation,
        priority: u8,
    ) -> SyncResult<QueueItem> {
        let queue = queue_for_priority(priority);
        self.enqueue(
            queue,
            QueuePayload::Operation(operation),
            priority,
            None,
            Vec::new(),
        )
        .await
    }

    // ── Drain machinery ──────────────────────────────────────────

    /// Starts the background drain tick. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let queues = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DRAIN_INTERVAL);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                queues.drain_all().await;
            }
        });
        *self.drain_task.lock().unwrap() = Some(handle);
        info!("queue processor started");
    }

    /// Stops scheduling future drains. In-flight items finish.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.drain_task.lock().unwrap().take() {
            handle.abort();
        }
        info!("queue processor stopped");
    }

    /// Drains every queue once, highest-priority queue first.
    pub async fn drain_all(&self) {
        let mut names: Vec<(String, u8)> = {
            let queues = self.queues.read().await;
            queues
                .iter()
                .map(|(name, state)| (name.clone(), state.config.priority))
                .collect()
        };
        names.sort_by_key(|(_, priority)| *priority);

        for (name, _) in names {
            self.drain_queue(&name).await;
        }
    }

    fn spawn_drain(&self, name: &str) {
        let queues = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            queues.drain_queue(&name).await;
        });
    }

    /// Drains one queue until it runs out of eligible items or concurrency
    /// slots. Items are executed on spawned tasks; this function returns as
    /// soon as everything startable has started.
    async fn drain_queue(&self, name: &str) {
        // Claim the queue against concurrent drains.
        {
            let mut queues = self.queues.write().await;
            let Some(state) = queues.get_mut(name) else {
                return;
            };
            if state.processing || state.config.paused || !state.config.enabled {
                return;
            }
            state.processing = true;
        }

        loop {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break; // no slot free; the next tick will pick this up
            };

            let completed = self.completed.read().await.clone();
            let in_flight = self.in_flight.read().await.clone();
            let failed = self.failed.read().await.clone();

            let popped = {
                let mut queues = self.queues.write().await;
                let pending_ids: HashSet<QueueItemId> = queues
                    .values()
                    .flat_map(|state| state.items.iter().map(|item| item.id))
                    .collect();

                let Some(state) = queues.get_mut(name) else {
                    break;
                };
                if state.config.paused || !state.config.enabled {
                    None
                } else {
                    let now = Utc::now();
                    let position = state.items.iter().position(|item| {
                        item.schedule_elapsed(now)
                            && item.dependencies.iter().all(|dep| {
                                completed.contains(dep)
                                    || (!pending_ids.contains(dep)
                                        && !in_flight.contains(dep)
                                        && !failed.contains(dep))
                            })
                    });
                    position.map(|index| state.items.remove(index))
                }
            };

            match popped {
                Some(item) => {
                    self.in_flight.write().await.insert(item.id);
                    let queues = self.clone();
                    let queue_name = name.to_string();
                    tokio::spawn(async move {
                        queues.process_item(&queue_name, item).await;
                        drop(permit);
                    });
                }
                None => {
                    drop(permit);
                    break;
                }
            }
        }

        let mut queues = self.queues.write().await;
        if let Some(state) = queues.get_mut(name) {
            state.processing = false;
            state.last_processed = Some(Utc::now());
        }
    }

    // ── Item execution ───────────────────────────────────────────

    async fn process_item(&self, queue: &str, mut item: QueueItem) {
        item.status = QueueItemStatus::Processing;
        item.attempts += 1;
        item.started_at = Some(Utc::now());
        if let Err(e) = self.store.save_queue_item(&item) {
            warn!("failed to persist item {}: {}", item.id, e);
        }

        debug!(
            "processing {} item {} (attempt {}/{})",
            queue, item.id, item.attempts, item.max_attempts
        );

        let outcome = self.execute(&item).await;
        self.in_flight.write().await.remove(&item.id);

        match outcome {
            Ok(()) => {
                item.status = QueueItemStatus::Completed;
                item.completed_at = Some(Utc::now());
                item.error = None;
                if let Err(e) = self.store.delete_queue_item(&item.id) {
                    warn!("failed to remove completed item {}: {}", item.id, e);
                }
                self.completed.write().await.insert(item.id);
                debug!("completed {} item {}", queue, item.id);
                self.bus.emit(SyncEvent::ItemCompleted {
                    queue: queue.to_string(),
                    item_id: item.id,
                });
                self.mark_processed(queue).await;
            }
            Err(error) => {
                item.error = Some(error.to_string());

                if error.is_retriable() && item.attempts_remaining() {
                    let base = {
                        let queues = self.queues.read().await;
                        queues
                            .get(queue)
                            .map(|state| state.config.retry_delay)
                            .unwrap_or(RETRY_DELAYS[0])
                    };
                    let delay = retry_delay(item.attempts, base) + jitter();
                    item.status = QueueItemStatus::Retrying;
                    item.scheduled_for =
                        Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));

                    debug!(
                        "retry scheduled for item {} in {:?} (attempt {}/{})",
                        item.id, delay, item.attempts, item.max_attempts
                    );
                    if let Err(e) = self.store.save_queue_item(&item) {
                        warn!("failed to persist retrying item {}: {}", item.id, e);
                    }

                    {
                        let mut queues = self.queues.write().await;
                        if let Some(state) = queues.get_mut(queue) {
                            state.items.push(item.clone());
                            state.sort_items();
                        }
                    }
                    self.bus.emit(SyncEvent::ItemRetryScheduled {
                        queue: queue.to_string(),
                        item_id: item.id,
                        attempt: item.attempts,
                        delay,
                    });
                } else {
                    warn!("item {} failed permanently: {}", item.id, error);
                    item.status = QueueItemStatus::Failed;
                    if let Err(e) = self.store.save_queue_item(&item) {
                        warn!("failed to persist failed item {}: {}", item.id, e);
                    }
                    self.failed.write().await.insert(item.id);
                    self.bus.emit(SyncEvent::ItemFailed {
                        queue: queue.to_string(),
                        item_id: item.id,
                        error: error.to_string(),
                    });
                    self.notifier
                        .notify(Notification::error(
                            "Sync failed",
                            format!("An item could not be synced: {error}"),
                        ))
                        .await;
                }
                self.mark_processed(queue).await;
            }
        }
    }

    async fn mark_processed(&self, queue: &str) {
        let mut queues = self.queues.write().await;
        if let Some(state) = queues.get_mut(queue) {
            state.last_processed = Some(Utc::now());
        }
    }

    /// Executes one item by payload kind. The discriminant was fixed at
    /// enqueue time; there is no field-sniffing here.
    async fn execute(&self, item: &QueueItem) -> SyncResult<()> {
        match &item.payload {
            QueuePayload::Record(record) => self.execute_record(record).await,
            QueuePayload::Operation(operation) => self.execute_operation(operation).await,
        }
    }

    async fn execute_record(&self, record: &SyncRecord) -> SyncResult<()> {
        if !record.payload.is_object() {
            return Err(SyncError::UnknownPayload(format!(
                "sync record {} payload is not an object",
                record.id
            )));
        }

        let mut record = record.clone();
        record.mark_syncing();
        self.store.save_sync_record(&record)?;

        let uploaded = self
            .remote
            .upload_record(
                &record.table_name,
                &record.record_id,
                &record.payload,
                record.operation,
            )
            .await;

        match uploaded {
            Ok(true) => {
                record.mark_completed();
                self.store.save_sync_record(&record)?;
                Ok(())
            }
            Ok(false) => {
                let error = SyncError::Remote {
                    status: 409,
                    message: "remote declined the record".to_string(),
                };
                record.mark_failed(error.to_string());
                self.store.save_sync_record(&record)?;
                Err(error)
            }
            Err(error) => {
                if error.is_retriable() {
                    record.mark_pending(error.to_string());
                } else {
                    record.mark_failed(error.to_string());
                }
                self.store.save_sync_record(&record)?;
                Err(error)
            }
        }
    }

    async fn execute_operation(&self, operation: &OfflineOperation) -> SyncResult<()> {
        if !operation.data.is_object() {
            return Err(SyncError::UnknownPayload(format!(
                "operation {} data is not an object",
                operation.id
            )));
        }

        match operation.kind {
            OperationKind::Order => self.handlers.apply_order(operation).await,
            OperationKind::InventoryUpdate => {
                self.handlers.apply_inventory_update(operation).await
            }
            OperationKind::Payment => self.handlers.apply_payment(operation).await,
            OperationKind::StockTransaction => {
                self.handlers.apply_stock_transaction(operation).await
            }
        }
    }

    // ── Manual retry & inspection ────────────────────────────────

    /// Re-enters a permanently failed item into its queue with a fresh
    /// attempt budget.
    pub async fn retry_item(&self, item_id: &QueueItemId) -> SyncResult<QueueItem> {
        let mut item = self
            .store
            .get_queue_item(item_id)?
            .ok_or_else(|| SyncError::ItemNotFound(item_id.to_string()))?;

        if item.status != QueueItemStatus::Failed {
            return Err(SyncError::ItemNotFailed(item_id.to_string()));
        }

        item.status = QueueItemStatus::Pending;
        item.attempts = 0;
        item.scheduled_for = None;
        item.error = None;

        {
            let mut queues = self.queues.write().await;
            let state = queues
                .get_mut(&item.queue)
                .ok_or_else(|| SyncError::QueueNotFound(item.queue.clone()))?;
            state.items.push(item.clone());
            state.sort_items();
        }
        self.failed.write().await.remove(item_id);
        self.store.save_queue_item(&item)?;

        info!("manually retrying item {}", item_id);
        self.spawn_drain(&item.queue);
        Ok(item)
    }

    /// Whether any queue currently holds (or is retrying) an item carrying
    /// the given sync record. Used by the orchestrator to avoid re-submitting
    /// a record the queue already owns the retry of.
    pub async fn holds_record(&self, id: &tillpoint_types::SyncRecordId) -> bool {
        let queues = self.queues.read().await;
        queues.values().any(|state| {
            state.items.iter().any(|item| match &item.payload {
                QueuePayload::Record(record) => record.id == *id,
                QueuePayload::Operation(operation) => operation.id == *id,
            })
        })
    }

    /// Permanently failed items awaiting manual intervention.
    pub async fn failed_items(&self) -> SyncResult<Vec<QueueItem>> {
        Ok(self
            .store
            .load_queue_items()?
            .into_iter()
            .filter(|item| item.status == QueueItemStatus::Failed)
            .collect())
    }

    /// Live item count of a queue.
    pub async fn current_size(&self, name: &str) -> SyncResult<usize> {
        let queues = self.queues.read().await;
        queues
            .get(name)
            .map(|state| state.items.len())
            .ok_or_else(|| SyncError::QueueNotFound(name.to_string()))
    }

    /// Snapshot of one queue.
    pub async fn queue_status(&self, name: &str) -> Option<QueueStatus> {
        let queues = self.queues.read().await;
        queues.get(name).map(|state| QueueStatus {
            name: name.to_string(),
            priority: state.config.priority,
            size: state.items.len(),
            max_size: state.config.max_size,
            paused: state.config.paused,
            enabled: state.config.enabled,
            processing: state.processing,
            last_processed: state.last_processed,
        })
    }

    /// Aggregate statistics across all queues.
    pub async fn statistics(&self) -> QueueStatistics {
        let queues = self.queues.read().await;
        let mut per_queue: Vec<QueueStatus> = queues
            .iter()
            .map(|(name, state)| QueueStatus {
                name: name.clone(),
                priority: state.config.priority,
                size: state.items.len(),
                max_size: state.config.max_size,
                paused: state.config.paused,
                enabled: state.config.enabled,
                processing: state.processing,
                last_processed: state.last_processed,
            })
            .collect();
        per_queue.sort_by_key(|status| status.priority);

        QueueStatistics {
            total_queues: per_queue.len(),
            total_items: per_queue.iter().map(|status| status.size).sum(),
            paused_queues: per_queue.iter().filter(|status| status.paused).count(),
            in_flight: MAX_CONCURRENT - self.semaphore.available_permits(),
            queues: per_queue,
        }
    }
}

/// Maps a record priority to its queue name.
fn queue_for_priority(priority: u8) -> &'static str {
    match priority {
        0 | 1 => "critical",
        2 => "high",
        3 => "normal",
        _ => "low",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_follows_table_and_clamps() {
        let base = Duration::from_secs(1);
        assert_eq!(retry_delay(1, base), Duration::from_secs(1));
        assert_eq!(retry_delay(2, base), Duration::from_secs(2));
        assert_eq!(retry_delay(3, base), Duration::from_secs(5));
        assert_eq!(retry_delay(4, base), Duration::from_secs(10));
        assert_eq!(retry_delay(5, base), Duration::from_secs(30));
        assert_eq!(retry_delay(12, base), Duration::from_secs(30));
    }

    #[test]
    fn retry_delay_never_below_base() {
        let base = Duration::from_secs(3);
        assert_eq!(retry_delay(1, base), Duration::from_secs(3));
        assert_eq!(retry_delay(3, base), Duration::from_secs(5));
    }

    #[test]
    fn priority_routing() {
        assert_eq!(queue_for_priority(1), "critical");
        assert_eq!(queue_for_priority(2), "high");
        assert_eq!(queue_for_priority(3), "normal");
        assert_eq!(queue_for_priority(9), "low");
    }
}
