//! Core type definitions for the TillPoint offline sync engine.
//!
//! This crate defines the fundamental, service-agnostic types shared by the
//! storage layer and the sync engine:
//! - Record and device identifiers (UUID v7)
//! - Sync bookkeeping records (`SyncRecord`, `OfflineOperation`)
//! - Queue work items (`QueueItem`, `QueuePayload`, `QueueConfig`)
//! - The conflict and merge-rule model (`SyncConflict`, `MergeRule`)
//!
//! All domain-specific shapes (orders, payments, inventory rows, ...) travel
//! through the engine as opaque JSON payloads; the core only understands
//! their table name, identity and canonical `updated_at` timestamp.

mod conflict;
mod ids;
mod queue;
mod record;

pub use conflict::{
    ConflictKind, FieldResolution, MergeResult, MergeRule, MergeStrategy, ResolutionStrategy,
    RuleScope, SyncConflict,
};
pub use ids::{ConflictId, DeviceId, QueueItemId, RecordId, SyncRecordId};
pub use queue::{QueueConfig, QueueItem, QueueItemStatus, QueuePayload};
pub use record::{OfflineOperation, Operation, OperationKind, SyncRecord, SyncStatus};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid value: {0}")]
    InvalidValue(String),
}
