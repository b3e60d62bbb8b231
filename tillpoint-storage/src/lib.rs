//! SQLite-backed local store for the TillPoint sync engine.
//!
//! The local store is the till's source of truth while offline: domain
//! records (orders, payments, inventory, products, categories) are written
//! here first and always readable, while the sync engine propagates them to
//! the backend in the background.
//!
//! Three concerns share one database file:
//! - Domain records, stored as JSON documents keyed by `(table, record_id)`
//! - Sync bookkeeping: sync records, queue definitions + pending items,
//!   conflict history and merge-rule overrides — enough to reconstruct all
//!   in-memory sync state after a restart
//! - A metadata key-value area (last-sync and last-cleanup timestamps)
//!
//! Serialization in and out of SQLite goes through this crate only; nothing
//! above it touches row shapes.

mod error;
mod local_store;

pub use error::{StorageError, StorageResult};
pub use local_store::LocalStore;
