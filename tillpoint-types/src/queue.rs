//! Queue work items and queue configuration.
//!
//! A `QueueItem` is the unit of work held by a sync queue. Its payload is a
//! tagged union fixed at enqueue time — the executor dispatches on the
//! variant, never by sniffing payload fields.

use crate::ids::QueueItemId;
use crate::record::{OfflineOperation, SyncRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// What a queue item carries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum QueuePayload {
    /// A sync record to upload through the remote record store.
    Record(SyncRecord),
    /// An offline domain operation to replay through the domain handlers.
    Operation(OfflineOperation),
}

/// Lifecycle state of a queue item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueItemStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Retrying,
}

impl fmt::Display for QueueItemStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Retrying => write!(f, "retrying"),
        }
    }
}

/// One unit of synchronization work, exclusively owned by its queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    /// Unique identifier for this item.
    pub id: QueueItemId,

    /// Name of the queue that owns this item.
    pub queue: String,

    /// The work to perform.
    pub payload: QueuePayload,

    /// Numeric priority; lower numbers process first.
    pub priority: u8,

    /// Current lifecycle state.
    pub status: QueueItemStatus,

    /// Number of execution attempts made so far.
    pub attempts: u32,

    /// Attempt budget; once exhausted the item is permanently failed.
    pub max_attempts: u32,

    /// Do not process before this time (retry backoff, deferred work).
    pub scheduled_for: Option<DateTime<Utc>>,

    /// Items that must complete before this one is eligible.
    #[serde(default)]
    pub dependencies: Vec<QueueItemId>,

    /// When the item was enqueued.
    pub created_at: DateTime<Utc>,

    /// When the current/last attempt started.
    pub started_at: Option<DateTime<Utc>>,

    /// When the item completed.
    pub completed_at: Option<DateTime<Utc>>,

    /// Last error message, if any attempt has failed.
    pub error: Option<String>,
}

impl QueueItem {
    /// Creates a new pending item for the given queue.
    #[must_use]
    pub fn new(
        queue: impl Into<String>,
        payload: QueuePayload,
        priority: u8,
        max_attempts: u32,
    ) -> Self {
        Self {
            id: QueueItemId::new(),
            queue: queue.into(),
            payload,
            priority,
            status: QueueItemStatus::Pending,
            attempts: 0,
            max_attempts,
            scheduled_for: None,
            dependencies: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
        }
    }

    /// Defers processing until the given time.
    #[must_use]
    pub fn scheduled_for(mut self, at: DateTime<Utc>) -> Self {
        self.scheduled_for = Some(at);
        self
    }

    /// Declares items that must complete before this one runs.
    #[must_use]
    pub fn with_dependencies(mut self, deps: Vec<QueueItemId>) -> Self {
        self.dependencies = deps;
        self
    }

    /// Whether the item's schedule gate has elapsed at `now`.
    #[must_use]
    pub fn schedule_elapsed(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_for.is_none_or(|at| at <= now)
    }

    /// Whether the item has attempts remaining.
    #[must_use]
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Configuration of one named priority queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Queue priority; lower-numbered queues are drained first each tick.
    pub priority: u8,

    /// Maximum number of items the queue will hold. Enqueueing into a full
    /// queue fails with a capacity error, never silently drops.
    pub max_size: usize,

    /// Attempt budget stamped onto items enqueued into this queue.
    pub max_attempts: u32,

    /// Base retry delay; the backoff table is clamped below this value.
    pub retry_delay: Duration,

    /// Whether the queue accepts and processes work at all.
    pub enabled: bool,

    /// Whether processing is paused. Paused queues still accept items.
    pub paused: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            priority: 3,
            max_size: 500,
            max_attempts: 3,
            retry_delay: Duration::from_secs(1),
            enabled: true,
            paused: false,
        }
    }
}

impl QueueConfig {
    /// Creates a config with the given priority and capacity.
    #[must_use]
    pub fn new(priority: u8, max_size: usize) -> Self {
        Self {
            priority,
            max_size,
            ..Self::default()
        }
    }
}
