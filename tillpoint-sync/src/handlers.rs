//! Domain operation handlers.
//!
//! Offline operations captured at the till (a sale, a stock adjustment) are
//! replayed through these callbacks when the queue drains them. Delivery is
//! at-least-once: a handler may see the same operation twice after a partial
//! failure and must be idempotent or deduplicate internally.

use crate::error::SyncResult;
use async_trait::async_trait;
use tillpoint_types::OfflineOperation;

/// Per-kind callbacks the queue executor dispatches offline operations to.
#[async_trait]
pub trait DomainHandlers: Send + Sync {
    /// Applies a captured order.
    async fn apply_order(&self, operation: &OfflineOperation) -> SyncResult<()>;

    /// Applies an inventory delta.
    async fn apply_inventory_update(&self, operation: &OfflineOperation) -> SyncResult<()>;

    /// Applies a captured payment.
    async fn apply_payment(&self, operation: &OfflineOperation) -> SyncResult<()>;

    /// Applies a stock transaction.
    async fn apply_stock_transaction(&self, operation: &OfflineOperation) -> SyncResult<()>;
}

/// Mock handlers for testing.
pub mod mock {
    use super::*;
    use crate::error::SyncError;
    use std::sync::Mutex;
    use tillpoint_types::OperationKind;

    /// Records every applied operation; optionally fails the first N calls.
    #[derive(Debug, Default)]
    pub struct RecordingHandlers {
        applied: Mutex<Vec<(OperationKind, OfflineOperation)>>,
        fail_next: Mutex<u32>,
    }

    impl RecordingHandlers {
        /// Creates handlers that always succeed.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes the next `n` calls fail with a transient network error.
        pub fn fail_next(&self, n: u32) {
            *self.fail_next.lock().unwrap() = n;
        }

        /// Operations applied so far, in order.
        pub fn applied(&self) -> Vec<(OperationKind, OfflineOperation)> {
            self.applied.lock().unwrap().clone()
        }

        fn apply(&self, kind: OperationKind, operation: &OfflineOperation) -> SyncResult<()> {
            let mut fail = self.fail_next.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(SyncError::Network("injected failure".to_string()));
            }
            self.applied.lock().unwrap().push((kind, operation.clone()));
            Ok(())
        }
    }

    #[async_trait]
    impl DomainHandlers for RecordingHandlers {
        async fn apply_order(&self, operation: &OfflineOperation) -> SyncResult<()> {
            self.apply(OperationKind::Order, operation)
        }

        async fn apply_inventory_update(&self, operation: &OfflineOperation) -> SyncResult<()> {
            self.apply(OperationKind::InventoryUpdate, operation)
        }

        async fn apply_payment(&self, operation: &OfflineOperation) -> SyncResult<()> {
            self.apply(OperationKind::Payment, operation)
        }

        async fn apply_stock_transaction(&self, operation: &OfflineOperation) -> SyncResult<()> {
            self.apply(OperationKind::StockTransaction, operation)
        }
    }
}
