//! Top-level synchronization lifecycle.
//!
//! The orchestrator composes the network monitor, the priority queues, the
//! conflict resolver and the local/remote stores into one end-to-end
//! pipeline: periodic automatic syncs, on-demand force syncs, and wholesale
//! reference-data refreshes.
//!
//! A sync run is re-entrant-guarded by a flag, not a lock: scheduling is
//! cooperative, so no two runs ever execute their critical sections
//! concurrently within one process. Per-item failures never abort a run —
//! one bad record must not block unrelated records.

use crate::conflict::ConflictResolver;
use crate::error::{SyncError, SyncResult};
use crate::event::{EventBus, SyncEvent};
use crate::monitor::NetworkMonitor;
use crate::notify::{Notification, Notifier};
use crate::queue::SyncQueues;
use crate::remote::RemoteStore;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tillpoint_storage::LocalStore;
use tillpoint_types::{Operation, RecordId, SyncRecord, SyncStatus};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Metadata key recording the last fully successful sync.
const META_LAST_SYNC: &str = "last_sync";
/// Metadata key recording the last maintenance pass.
const META_LAST_CLEANUP: &str = "last_cleanup";

/// Reference tables that are remote-authoritative and refreshed wholesale.
const REFERENCE_TABLES: [&str; 4] = ["products", "categories", "inventory", "settings"];

/// Configuration for the sync orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Records per batch within one sync run.
    pub batch_size: usize,
    /// Cadence of automatic sync runs while online.
    pub auto_sync_interval: Duration,
    /// Delay between a reconnect signal and the force sync it triggers.
    pub reconnect_debounce: Duration,
    /// How long completed sync records are kept before garbage collection.
    pub sync_record_retention: chrono::Duration,
    /// How long resolved conflicts are kept before garbage collection.
    pub conflict_retention: chrono::Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            auto_sync_interval: Duration::from_secs(5 * 60),
            reconnect_debounce: Duration::from_secs(1),
            sync_record_retention: chrono::Duration::days(7),
            conflict_retention: chrono::Duration::days(30),
        }
    }
}

/// Aggregate outcome of one sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Every attempted record succeeded.
    Completed,
    /// Some records succeeded, some failed. Never silently treated as
    /// success.
    Partial,
    /// Every attempted record failed.
    Failed,
}

/// Per-run accounting surfaced at the orchestrator level. Item-level detail
/// stays queryable through the store and the conflict resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcome: SyncOutcome,
}

/// Drives periodic and on-demand synchronization.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    config: OrchestratorConfig,
    store: Arc<LocalStore>,
    remote: Arc<dyn RemoteStore>,
    monitor: NetworkMonitor,
    queues: SyncQueues,
    resolver: Arc<ConflictResolver>,
    notifier: Arc<dyn Notifier>,
    bus: EventBus,
    syncing: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    scheduler_task: Arc<StdMutex<Option<JoinHandle<()>>>>,
}

impl SyncOrchestrator {
    /// Wires the orchestrator to its collaborators.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: OrchestratorConfig,
        store: Arc<LocalStore>,
        remote: Arc<dyn RemoteStore>,
        monitor: NetworkMonitor,
        queues: SyncQueues,
        resolver: Arc<ConflictResolver>,
        notifier: Arc<dyn Notifier>,
        bus: EventBus,
    ) -> Self {
        Self {
            config,
            store,
            remote,
            monitor,
            queues,
            resolver,
            notifier,
            bus,
            syncing: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            scheduler_task: Arc::new(StdMutex::new(None)),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Starts the monitor, the queue processor and the periodic sync
    /// scheduler. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.monitor.start();
        self.queues.start();

        let orchestrator = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(orchestrator.config.auto_sync_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await; // the immediate first tick
            loop {
                interval.tick().await;
                // Offline ticks just reschedule; no wasted attempts against
                // a known-dead link.
                if orchestrator.monitor.is_online().await {
                    if let Err(e) = orchestrator.perform_sync().await {
                        debug!("scheduled sync did not run: {e}");
                    }
                }
            }
        });
        *self.scheduler_task.lock().unwrap() = Some(handle);
        info!("sync orchestrator started");
    }

    /// Stops the scheduler and the composed components. In-flight work
    /// finishes; only future scheduling stops.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.scheduler_task.lock().unwrap().take() {
            handle.abort();
        }
        self.queues.stop();
        self.monitor.stop();
        info!("sync orchestrator stopped");
    }

    /// Platform hook: connectivity came back. Probes immediately, then runs
    /// a debounced force sync.
    pub fn handle_online(&self) {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.monitor.handle_online_hint().await;
            tokio::time::sleep(orchestrator.config.reconnect_debounce).await;
            if let Err(e) = orchestrator.force_sync().await {
                debug!("reconnect sync did not run: {e}");
            }
        });
    }

    /// Platform hook: connectivity was lost. The scheduler keeps ticking but
    /// skips while the monitor reports offline.
    pub async fn handle_offline(&self) {
        self.monitor.handle_offline_hint().await;
    }

    // ── Sync runs ────────────────────────────────────────────────

    /// Runs one full sync of all pending records, in fixed-size batches with
    /// per-item failure isolation. Only proceeds while online; a concurrent
    /// call is suppressed.
    pub async fn perform_sync(&self) -> SyncResult<SyncReport> {
        if !self.monitor.is_online().await {
            return Err(SyncError::Offline);
        }
        if self.syncing.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyRunning);
        }

        let result = self.run_sync().await;
        self.syncing.store(false, Ordering::SeqCst);
        result
    }

    /// Explicitly invoked sync (user action or reconnect). Refreshes the
    /// connectivity assessment first and warns instead of attempting
    /// anything while offline.
    pub async fn force_sync(&self) -> SyncResult<SyncReport> {
        let status = self.monitor.force_check().await;
        if !status.online {
            self.notifier
                .notify(Notification::warning(
                    "Offline",
                    "Cannot sync while offline",
                ))
                .await;
            return Err(SyncError::Offline);
        }
        self.perform_sync().await
    }

    async fn run_sync(&self) -> SyncResult<SyncReport> {
        self.bus.emit(SyncEvent::SyncStarted);

        let mut pending = self.store.pending_sync_records()?;
        // Records the queue is already retrying keep their backoff schedule.
        let mut retained = Vec::new();
        for record in pending.drain(..) {
            if !self.queues.holds_record(&record.id).await {
                retained.push(record);
            }
        }
        let pending = retained;

        info!("sync run: {} pending records", pending.len());

        let mut succeeded = 0usize;
        let mut failed = 0usize;

        for batch in pending.chunks(self.config.batch_size) {
            for record in batch {
                match self.process_record(record).await {
                    Ok(()) => succeeded += 1,
                    Err(e) => {
                        failed += 1;
                        warn!(
                            "record {}/{} failed to sync: {e}",
                            record.table_name, record.record_id
                        );
                    }
                }
            }
        }

        let outcome = if failed == 0 {
            SyncOutcome::Completed
        } else if succeeded > 0 {
            SyncOutcome::Partial
        } else {
            SyncOutcome::Failed
        };

        match outcome {
            SyncOutcome::Completed => {
                self.store.set_metadata(
                    META_LAST_SYNC,
                    &Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
                )?;
                if succeeded > 0 {
                    self.notifier
                        .notify(Notification::info(
                            "Sync complete",
                            format!("Synced {succeeded} records"),
                        ))
                        .await;
                }
            }
            SyncOutcome::Partial => {
                self.notifier
                    .notify(Notification::warning(
                        "Sync partial",
                        format!("Synced {succeeded} records, {failed} failed"),
                    ))
                    .await;
            }
            SyncOutcome::Failed => {
                self.notifier
                    .notify(Notification::error(
                        "Sync failed",
                        format!("{failed} records failed to sync"),
                    ))
                    .await;
            }
        }

        let report = SyncReport {
            attempted: succeeded + failed,
            succeeded,
            failed,
            outcome,
        };
        info!(
            "sync run finished: {}/{} succeeded",
            report.succeeded, report.attempted
        );
        self.bus.emit(SyncEvent::SyncFinished(report.clone()));
        Ok(report)
    }

    /// Pushes one record to the remote, reconciling divergence through the
    /// conflict resolver. Transient failures re-enter the pending pool
    /// through the sync queue, which owns all retry counting and backoff.
    async fn process_record(&self, record: &SyncRecord) -> SyncResult<()> {
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
            Ok(false) => self.reconcile(record).await,
            Err(e) if e.is_retriable() => {
                record.mark_pending(e.to_string());
                self.store.save_sync_record(&record)?;
                self.queues.enqueue_record(record).await?;
                Err(e)
            }
            Err(e) => {
                record.mark_failed(e.to_string());
                self.store.save_sync_record(&record)?;
                self.notifier
                    .notify(Notification::error(
                        "Sync failed",
                        format!("A record could not be synced: {e}"),
                    ))
                    .await;
                Err(e)
            }
        }
    }

    /// Handles a declined upload: fetch the remote copy, detect and resolve
    /// the conflict, write the merged record back locally, and push it
    /// upstream.
    async fn reconcile(&self, mut record: SyncRecord) -> SyncResult<()> {
        let remote_records = self.remote.download_collection(&record.table_name).await?;
        let wanted = record.record_id.to_string();
        let remote_copy = remote_records
            .into_iter()
            .find(|value| value.get("id").and_then(Value::as_str) == Some(wanted.as_str()));

        let Some(remote_copy) = remote_copy else {
            // Declined without a competing copy: nothing to merge against.
            let error = SyncError::Remote {
                status: 409,
                message: "remote declined the record".to_string(),
            };
            record.mark_failed(error.to_string());
            self.store.save_sync_record(&record)?;
            return Err(error);
        };

        let Some(conflict) = self.resolver.detect_conflict(&record, &remote_copy)? else {
            // Only volatile fields differ; the remote copy is equivalent.
            record.mark_completed();
            self.store.save_sync_record(&record)?;
            return Ok(());
        };

        let resolution = self.resolver.resolve_conflict(&conflict)?;
        if resolution.manual_resolution_required {
            record.mark_failed("conflict requires manual resolution");
            self.store.save_sync_record(&record)?;
            self.notifier
                .notify(Notification::warning(
                    "Conflict needs attention",
                    format!(
                        "{}/{} has a conflict that must be resolved manually",
                        record.table_name, record.record_id
                    ),
                ))
                .await;
            return Err(SyncError::ConflictUnresolved(conflict.id));
        }

        let Some(merged) = resolution.merged_data else {
            return Err(SyncError::ConflictUnresolved(conflict.id));
        };

        // The merged record becomes authoritative on both sides.
        self.store
            .put_record(&record.table_name, &record.record_id, &merged, Utc::now())?;
        let accepted = self
            .remote
            .upload_record(&record.table_name, &record.record_id, &merged, Operation::Update)
            .await?;

        if accepted {
            record.mark_completed();
            self.store.save_sync_record(&record)?;
            Ok(())
        } else {
            let error = SyncError::Remote {
                status: 409,
                message: "remote declined the merged record".to_string(),
            };
            record.mark_failed(error.to_string());
            self.store.save_sync_record(&record)?;
            Err(error)
        }
    }

    // ── Reference data ───────────────────────────────────────────

    /// Pulls canonical reference data (products, categories, inventory,
    /// settings) in parallel and overwrites the local copies wholesale.
    /// Reference data is remote-authoritative; it never goes through the
    /// field-level merge path.
    pub async fn download_fresh_data(&self) -> SyncResult<()> {
        info!("downloading fresh reference data");

        let [products, categories, inventory, settings] = REFERENCE_TABLES;
        let (products_r, categories_r, inventory_r, settings_r) = tokio::join!(
            self.remote.download_collection(products),
            self.remote.download_collection(categories),
            self.remote.download_collection(inventory),
            self.remote.download_collection(settings),
        );

        let now = Utc::now();
        let mut first_error: Option<SyncError> = None;

        for (table, result) in [
            (products, products_r),
            (categories, categories_r),
            (inventory, inventory_r),
            (settings, settings_r),
        ] {
            match result {
                Ok(records) => {
                    let keyed = keyed_records(table, records);
                    self.store.replace_table(table, &keyed, now)?;
                }
                Err(e) => {
                    warn!("failed to download {table}: {e}");
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            None => {
                self.notifier
                    .notify(Notification::info(
                        "Data updated",
                        "Fresh data downloaded from the server",
                    ))
                    .await;
                Ok(())
            }
            Some(e) => {
                self.notifier
                    .notify(Notification::error(
                        "Download failed",
                        "Could not refresh data from the server",
                    ))
                    .await;
                Err(e)
            }
        }
    }

    // ── Manual retry & maintenance ───────────────────────────────

    /// Resets every permanently failed record and queue item to pending so
    /// the normal machinery picks them up again. Returns how many sync
    /// records were reset.
    pub async fn retry_failed(&self) -> SyncResult<usize> {
        let failed = self.store.sync_records_with_status(SyncStatus::Failed)?;
        let count = failed.len();
        for mut record in failed {
            record.reset_for_retry();
            self.store.save_sync_record(&record)?;
        }

        for item in self.queues.failed_items().await? {
            if let Err(e) = self.queues.retry_item(&item.id).await {
                warn!("could not retry item {}: {e}", item.id);
            }
        }

        if count > 0 {
            info!("reset {count} failed records for retry");
        }
        Ok(count)
    }

    /// Garbage-collects completed sync records and resolved conflicts past
    /// their retention windows.
    pub async fn run_maintenance(&self) -> SyncResult<()> {
        let now = Utc::now();
        let records = self
            .store
            .purge_completed_sync_records(now - self.config.sync_record_retention)?;
        let conflicts = self.resolver.purge_resolved(now - self.config.conflict_retention)?;
        self.store.set_metadata(
            META_LAST_CLEANUP,
            &now.to_rfc3339_opts(SecondsFormat::Micros, true),
        )?;
        debug!("maintenance: purged {records} sync records, {conflicts} conflicts");
        Ok(())
    }

    // ── Inspection ───────────────────────────────────────────────

    /// When the last fully successful sync finished, if ever.
    pub fn last_sync_time(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let value = self.store.get_metadata(META_LAST_SYNC)?;
        Ok(value
            .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
            .map(|dt| dt.with_timezone(&Utc)))
    }

    /// Number of records still awaiting propagation.
    pub fn pending_count(&self) -> SyncResult<usize> {
        Ok(self.store.pending_sync_record_count()?)
    }

    /// Whether a sync run is currently executing.
    pub fn is_syncing(&self) -> bool {
        self.syncing.load(Ordering::SeqCst)
    }
}

/// Keys downloaded reference records by their `id` field; records without a
/// parseable id are skipped with a warning rather than corrupting the table.
fn keyed_records(table: &str, records: Vec<Value>) -> Vec<(RecordId, Value)> {
    records
        .into_iter()
        .filter_map(|value| {
            let id = value
                .get("id")
                .and_then(Value::as_str)
                .and_then(|s| RecordId::parse(s).ok());
            match id {
                Some(id) => Some((id, value)),
                None => {
                    warn!("skipping {table} record without a valid id");
                    None
                }
            }
        })
        .collect()
}
