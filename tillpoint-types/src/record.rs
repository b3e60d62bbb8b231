//! Sync bookkeeping records.
//!
//! A `SyncRecord` represents one pending change to propagate to the backend.
//! An `OfflineOperation` represents a domain action captured while offline
//! (a sale, an inventory adjustment) that is replayed through the domain
//! handlers when connectivity returns.
//!
//! Payloads are captured at enqueue time and are immutable from then on:
//! retries resend the same payload unless a newer record explicitly
//! supersedes it.

use crate::ids::{RecordId, SyncRecordId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The kind of write a sync record propagates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Delete => write!(f, "DELETE"),
        }
    }
}

/// The domain category of an offline operation or sync record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Order,
    Payment,
    InventoryUpdate,
    StockTransaction,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Order => write!(f, "order"),
            Self::Payment => write!(f, "payment"),
            Self::InventoryUpdate => write!(f, "inventory_update"),
            Self::StockTransaction => write!(f, "stock_transaction"),
        }
    }
}

/// Lifecycle state of a sync record.
///
/// Transitions: `Pending → Syncing → {Completed | Pending (retry) | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Completed,
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Syncing => write!(f, "syncing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// One pending change to propagate to the remote record store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// Unique identifier for this record.
    pub id: SyncRecordId,

    /// Target table on the backend.
    pub table_name: String,

    /// Identity of the domain record within its table.
    pub record_id: RecordId,

    /// The write to perform remotely.
    pub operation: Operation,

    /// Domain category, used to route the record to a priority queue.
    pub kind: OperationKind,

    /// The data payload captured at enqueue time. Immutable once created.
    pub payload: Value,

    /// When the change was captured.
    pub created_at: DateTime<Utc>,

    /// Current lifecycle state.
    pub status: SyncStatus,

    /// Number of upload attempts made so far.
    pub attempts: u32,

    /// When the last attempt was made, if any.
    pub last_attempt: Option<DateTime<Utc>>,

    /// Last error message, if the record has failed at least once.
    pub error: Option<String>,

    /// Numeric priority; lower numbers sync first.
    pub priority: u8,
}

impl SyncRecord {
    /// Default priority for records that don't specify one.
    pub const DEFAULT_PRIORITY: u8 = 3;

    /// Creates a new pending sync record.
    #[must_use]
    pub fn new(
        table_name: impl Into<String>,
        record_id: RecordId,
        operation: Operation,
        kind: OperationKind,
        payload: Value,
    ) -> Self {
        Self {
            id: SyncRecordId::new(),
            table_name: table_name.into(),
            record_id,
            operation,
            kind,
            payload,
            created_at: Utc::now(),
            status: SyncStatus::Pending,
            attempts: 0,
            last_attempt: None,
            error: None,
            priority: Self::DEFAULT_PRIORITY,
        }
    }

    /// Sets the record's priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the record as being uploaded, counting the attempt.
    pub fn mark_syncing(&mut self) {
        self.status = SyncStatus::Syncing;
        self.attempts += 1;
        self.last_attempt = Some(Utc::now());
    }

    /// Marks the record as successfully propagated.
    pub fn mark_completed(&mut self) {
        self.status = SyncStatus::Completed;
        self.error = None;
    }

    /// Returns the record to the pending pool after a retriable failure.
    pub fn mark_pending(&mut self, error: impl Into<String>) {
        self.status = SyncStatus::Pending;
        self.error = Some(error.into());
    }

    /// Marks the record as permanently failed. No further automatic attempt
    /// will be made; a manual retry resets it to pending.
    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = SyncStatus::Failed;
        self.error = Some(error.into());
    }

    /// Resets a failed record for a manual retry.
    pub fn reset_for_retry(&mut self) {
        self.status = SyncStatus::Pending;
        self.attempts = 0;
        self.error = None;
    }
}

/// A domain action captured while offline, replayed through the domain
/// handlers at sync time. Delivery is at-least-once; handlers must be
/// idempotent or deduplicate internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineOperation {
    /// Unique identifier for this operation.
    pub id: SyncRecordId,

    /// The kind of domain action.
    pub kind: OperationKind,

    /// The domain record the action targets.
    pub record_id: RecordId,

    /// Action data (e.g. a stock delta, a payment body).
    pub data: Value,

    /// Current lifecycle state.
    pub status: SyncStatus,

    /// When the action was captured.
    pub created_at: DateTime<Utc>,

    /// When the action was applied, if it has been.
    pub executed_at: Option<DateTime<Utc>>,

    /// Last error message, if any.
    pub error: Option<String>,
}

impl OfflineOperation {
    /// Creates a new pending offline operation.
    #[must_use]
    pub fn new(kind: OperationKind, record_id: RecordId, data: Value) -> Self {
        Self {
            id: SyncRecordId::new(),
            kind,
            record_id,
            data,
            status: SyncStatus::Pending,
            created_at: Utc::now(),
            executed_at: None,
            error: None,
        }
    }

    /// Marks the operation as applied.
    pub fn mark_executed(&mut self) {
        self.status = SyncStatus::Completed;
        self.executed_at = Some(Utc::now());
        self.error = None;
    }
}
