//! Batch Dispatcher
//!
//! Fans a batch of transfer intents out to the orchestrator through a
//! bounded worker pool. The batch size cap is enforced before any item is
//! touched: an oversized batch is rejected whole, with zero side effects.
//!
//! Results come back in input order, one slot per intent, with per-item
//! outcomes. One bad intent never poisons its neighbors.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tracing::{info, warn};

use super::error::TransferError;
use super::orchestrator::TransferOrchestrator;
use super::types::{Transfer, TransferIntent};
use crate::context::RequestContext;

pub const DEFAULT_MAX_BATCH_SIZE: usize = 20;
pub const DEFAULT_WORKER_COUNT: usize = 4;

pub struct BatchDispatcher {
    orchestrator: Arc<TransferOrchestrator>,
    /// Caps concurrent orchestrations, not queue depth
    permits: Arc<Semaphore>,
    max_batch_size: usize,
}

impl BatchDispatcher {
    pub fn new(
        orchestrator: Arc<TransferOrchestrator>,
        worker_count: usize,
        max_batch_size: usize,
    ) -> Self {
        Self {
            orchestrator,
            permits: Arc::new(Semaphore::new(worker_count.max(1))),
            max_batch_size,
        }
    }

    /// Dispatch a batch of intents and wait for every item's outcome.
    ///
    /// The returned vector is index-aligned with the input. The outer error
    /// fires only for whole-batch rejection (oversized batch), before any
    /// persistence or ledger call.
    pub async fn dispatch(
        &self,
        ctx: RequestContext,
        intents: Vec<TransferIntent>,
    ) -> Result<Vec<Result<Transfer, TransferError>>, TransferError> {
        if intents.len() > self.max_batch_size {
            warn!(
                batch_size = intents.len(),
                max = self.max_batch_size,
                correlation_id = %ctx,
                "Rejecting oversized batch"
            );
            return Err(TransferError::Validation(format!(
                "Batch size {} exceeds maximum of {}",
                intents.len(),
                self.max_batch_size
            )));
        }
        if intents.is_empty() {
            return Ok(Vec::new());
        }

        info!(
            batch_size = intents.len(),
            correlation_id = %ctx,
            "Dispatching transfer batch"
        );

        let mut handles = Vec::with_capacity(intents.len());
        for intent in intents {
            let orchestrator = self.orchestrator.clone();
            let permits = self.permits.clone();
            let ctx = ctx.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permits
                    .acquire_owned()
                    .await
                    .map_err(|_| TransferError::Internal("Worker pool shut down".to_string()))?;
                orchestrator.submit(ctx, intent).await
            }));
        }

        // Await in input order; spawned tasks run to completion regardless
        let mut results = Vec::with_capacity(handles.len());
        for handle in handles {
            let result = handle.await.unwrap_or_else(|e| {
                Err(TransferError::Internal(format!(
                    "Batch worker failed: {}",
                    e
                )))
            });
            results.push(result);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idempotency::MemoryIdempotencyStore;
    use crate::ledger::client::MockLedgerClient;
    use crate::ledger::{BreakerConfig, BreakerRegistry, NoBackoff, ResilientLedgerClient, RetryPolicy, SystemClock};
    use crate::transfer::store::MemoryTransferStore;
    use crate::transfer::state::TransferStatus;

    fn dispatcher(mock: Arc<MockLedgerClient>, workers: usize, cap: usize) -> (BatchDispatcher, Arc<MemoryTransferStore>) {
        let store = Arc::new(MemoryTransferStore::new());
        let idempotency = Arc::new(MemoryIdempotencyStore::new(24));
        let registry = BreakerRegistry::new(BreakerConfig::default(), Arc::new(SystemClock));
        let ledger = Arc::new(ResilientLedgerClient::new(
            mock,
            &registry,
            RetryPolicy::new(1, Arc::new(NoBackoff)),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            store.clone(),
            idempotency,
            ledger,
        ));
        (BatchDispatcher::new(orchestrator, workers, cap), store)
    }

    fn intent(from: i64, to: i64, amount: &str, key: &str) -> TransferIntent {
        TransferIntent::new(from, to, amount.parse().unwrap(), key)
    }

    #[tokio::test]
    async fn test_oversized_batch_rejected_before_any_work() {
        let mock = Arc::new(MockLedgerClient::new().with_account(1, "100.00").with_account(2, "0.00"));
        let (dispatcher, store) = dispatcher(mock.clone(), 4, 3);

        let batch: Vec<_> = (0..4)
            .map(|i| intent(1, 2, "1.00", &format!("k{}", i)))
            .collect();

        let err = dispatcher
            .dispatch(RequestContext::generate(), batch)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Validation(_)));
        assert!(store.is_empty());
        assert_eq!(mock.get_account_calls(), 0);
    }

    #[tokio::test]
    async fn test_results_preserve_input_order_with_mixed_outcomes() {
        let mock = Arc::new(MockLedgerClient::new().with_account(1, "50.00").with_account(2, "0.00"));
        let (dispatcher, _) = dispatcher(mock, 2, 20);

        let batch = vec![
            intent(1, 2, "10.00", "ok-1"),
            intent(1, 1, "10.00", "bad-same-account"),
            intent(1, 2, "10.00", "ok-2"),
        ];

        let results = dispatcher
            .dispatch(RequestContext::generate(), batch)
            .await
            .unwrap();
        assert_eq!(results.len(), 3);

        let first = results[0].as_ref().unwrap();
        assert_eq!(first.idempotency_key, "ok-1");
        assert_eq!(first.status, TransferStatus::Completed);

        assert!(matches!(results[1], Err(TransferError::Validation(_))));

        let third = results[2].as_ref().unwrap();
        assert_eq!(third.idempotency_key, "ok-2");
        assert_eq!(third.status, TransferStatus::Completed);
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_noop() {
        let mock = Arc::new(MockLedgerClient::new());
        let (dispatcher, store) = dispatcher(mock, 2, 20);

        let results = dispatcher
            .dispatch(RequestContext::generate(), Vec::new())
            .await
            .unwrap();
        assert!(results.is_empty());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_keys_within_batch_resolve_to_one_transfer() {
        let mock = Arc::new(MockLedgerClient::new().with_account(1, "100.00").with_account(2, "0.00"));
        let (dispatcher, store) = dispatcher(mock, 4, 20);

        let batch = vec![
            intent(1, 2, "5.00", "dup"),
            intent(1, 2, "5.00", "dup"),
            intent(1, 2, "5.00", "dup"),
        ];

        let results = dispatcher
            .dispatch(RequestContext::generate(), batch)
            .await
            .unwrap();

        let ids: std::collections::HashSet<_> = results
            .iter()
            .map(|r| r.as_ref().unwrap().id)
            .collect();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
