//! Typed event bus for sync engine notifications.
//!
//! Components publish state transitions here; the application shell (status
//! bar, sync indicator, diagnostics screen) subscribes. Events are advisory:
//! a slow subscriber that lags past the channel capacity misses old events
//! rather than blocking the engine.

use crate::monitor::NetworkStatus;
use crate::orchestrator::SyncReport;
use std::time::Duration;
use tillpoint_types::{ConflictId, QueueItemId};
use tokio::sync::broadcast;

/// Default buffered capacity of the event channel.
const EVENT_CAPACITY: usize = 256;

/// An event emitted by the sync engine.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// Connectivity was lost (total probe failure or platform signal).
    ConnectionLost(NetworkStatus),
    /// Connectivity came back.
    ConnectionRestored(NetworkStatus),
    /// Link quality changed tier without a full loss/restore.
    ConnectionChanged(NetworkStatus),

    /// An item was admitted into a queue.
    ItemEnqueued { queue: String, item_id: QueueItemId },
    /// An item completed successfully.
    ItemCompleted { queue: String, item_id: QueueItemId },
    /// An item failed and was rescheduled for a later attempt.
    ItemRetryScheduled {
        queue: String,
        item_id: QueueItemId,
        attempt: u32,
        delay: Duration,
    },
    /// An item exhausted its attempts or failed permanently.
    ItemFailed {
        queue: String,
        item_id: QueueItemId,
        error: String,
    },

    /// A queue was paused.
    QueuePaused { queue: String },
    /// A queue was resumed.
    QueueResumed { queue: String },
    /// A queue was cleared; `discarded` items were dropped.
    QueueCleared { queue: String, discarded: usize },

    /// A sync run started.
    SyncStarted,
    /// A sync run finished (fully, partially or not at all).
    SyncFinished(SyncReport),

    /// A local/remote divergence was detected.
    ConflictDetected { conflict_id: ConflictId, table: String },
    /// A conflict needs an operator to supply resolved data.
    ManualResolutionRequired { conflict_id: ConflictId, table: String },
}

/// Broadcast channel the engine publishes [`SyncEvent`]s on.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus with the default capacity.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Subscribes to all subsequent events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publishes an event. Never blocks; if no subscriber is listening the
    /// event is dropped.
    pub fn emit(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
