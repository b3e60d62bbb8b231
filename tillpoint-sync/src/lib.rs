//! Offline-first sync engine for TillPoint.
//!
//! A till keeps serving customers with or without a connection: domain
//! writes land in the local store immediately, and this crate makes remote
//! consistency eventual — monitored, retried and conflict-resolved in the
//! background.
//!
//! # Architecture
//!
//! - **Monitor**: probes independent endpoints to assess real link quality,
//!   beyond the platform's raw online flag
//! - **Queues**: named priority classes with capacity limits, scheduling
//!   gates, dependencies and bounded exponential-backoff retries
//! - **Resolver**: detects local/remote divergence and merges it field by
//!   field under configurable rules, with a mandatory audit trail
//! - **Orchestrator**: periodic and on-demand sync runs, batched with
//!   per-item failure isolation, plus wholesale reference-data refresh
//!
//! # Flow
//!
//! 1. A domain operation (e.g. completing a sale) writes to the local store
//!    and enqueues a sync record with a priority
//! 2. When the monitor reports sufficient quality, the queues drain items
//!    to the remote record store under a global concurrency cap
//! 3. A declined upload goes through conflict detection and merge before
//!    the merged record is written back and pushed upstream
//! 4. Failures retry with capped backoff until the attempt budget is spent,
//!    then surface for manual intervention — never silently dropped
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tillpoint_storage::LocalStore;
//! use tillpoint_sync::{
//!     EventBus, HttpRemoteConfig, HttpRemoteStore, LogNotifier, MonitorConfig, NetworkMonitor,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LocalStore::open("till.db")?);
//! let remote = Arc::new(HttpRemoteStore::new(HttpRemoteConfig::default())?);
//! let bus = EventBus::new();
//! let monitor = NetworkMonitor::new(MonitorConfig::default(), bus.clone());
//! # Ok(())
//! # }
//! ```

mod conflict;
mod error;
mod event;
mod handlers;
mod monitor;
mod notify;
mod orchestrator;
mod queue;
mod remote;

pub use conflict::{ConflictResolver, ConflictStatistics, CustomResolver, ResolverConfig};
pub use error::{SyncError, SyncResult};
pub use event::{EventBus, SyncEvent};
pub use handlers::DomainHandlers;
pub use monitor::{
    ConnectionQuality, ConnectionType, MonitorConfig, NetworkMonitor, NetworkStatus,
    PerformanceMetrics, ProbeEndpoint,
};
pub use notify::{LogNotifier, Notification, Notifier, Severity};
pub use orchestrator::{OrchestratorConfig, SyncOrchestrator, SyncOutcome, SyncReport};
pub use queue::{QueueStatistics, QueueStatus, SyncQueues, retry_delay};
pub use remote::{HttpRemoteConfig, HttpRemoteStore, RemoteStore};

// Test doubles for the engine's seams.
pub use handlers::mock as handlers_mock;
pub use remote::mock as remote_mock;
