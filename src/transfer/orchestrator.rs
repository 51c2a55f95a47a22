//! Transfer Orchestrator
//!
//! Drives a single transfer from intake to a terminal state. This is the
//! central component: it deduplicates on the idempotency key, creates the
//! PENDING record, calls the ledger through the resilient client, and folds
//! every post-PENDING failure into the transfer's terminal status.
//!
//! # Safety Invariants
//!
//! 1. Validation runs before any persistence or remote call
//! 2. At most one `Transfer` exists per idempotency key (store uniqueness)
//! 3. Terminal transitions are a single persisted write
//! 4. Once a PENDING record exists, the caller always receives a `Transfer`
//!    value; only pre-persistence validation surfaces as an error

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info, warn};

use super::error::TransferError;
use super::state::TransferStatus;
use super::store::{CreateOutcome, TransferStore};
use super::types::{Transfer, TransferId, TransferIntent};
use crate::context::RequestContext;
use crate::idempotency::IdempotencyStore;
use crate::ledger::ResilientLedgerClient;

pub struct TransferOrchestrator {
    store: Arc<dyn TransferStore>,
    idempotency: Arc<dyn IdempotencyStore>,
    ledger: Arc<ResilientLedgerClient>,
    /// Reject idempotency-key reuse with different parameters instead of
    /// replaying (default off: replay is a pure function of the key)
    strict_idempotency: bool,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn TransferStore>,
        idempotency: Arc<dyn IdempotencyStore>,
        ledger: Arc<ResilientLedgerClient>,
    ) -> Self {
        Self {
            store,
            idempotency,
            ledger,
            strict_idempotency: false,
        }
    }

    pub fn with_strict_idempotency(mut self, strict: bool) -> Self {
        self.strict_idempotency = strict;
        self
    }

    /// Submit a transfer intent and wait for its terminal outcome.
    ///
    /// The orchestration itself runs on a detached task: a caller that
    /// times out and drops this future abandons the wait, but the transfer
    /// still reaches a terminal state and can be discovered later via
    /// [`Self::get_by_id`] or the idempotency key.
    pub async fn submit(
        self: &Arc<Self>,
        ctx: RequestContext,
        intent: TransferIntent,
    ) -> Result<Transfer, TransferError> {
        validate_intent(&intent)?;

        let this = self.clone();
        let handle = tokio::spawn(async move { this.orchestrate(ctx, intent).await });
        handle
            .await
            .map_err(|e| TransferError::Internal(format!("Orchestration task failed: {}", e)))?
    }

    async fn orchestrate(
        &self,
        ctx: RequestContext,
        intent: TransferIntent,
    ) -> Result<Transfer, TransferError> {
        let key = intent.idempotency_key.clone();

        // Replay path 1: cached terminal response
        if let Some(record) = self.idempotency.lookup(&key).await {
            match serde_json::from_str::<Transfer>(&record.cached_response) {
                Ok(cached) => {
                    info!(
                        key = %key,
                        transfer_id = %cached.id,
                        correlation_id = %ctx,
                        "Returning cached response for idempotent replay"
                    );
                    self.check_reuse(&cached, &intent)?;
                    return Ok(cached);
                }
                Err(e) => {
                    // Fall through: the transfer record is authoritative
                    warn!(key = %key, error = %e, "Cached response is malformed, ignoring");
                }
            }
        }

        // Replay path 2: existing transfer row (terminal, or a concurrent
        // duplicate still in flight - either way it is the same transfer)
        if let Some(existing) = self.store.find_by_idempotency_key(&key).await? {
            info!(
                key = %key,
                transfer_id = %existing.id,
                status = %existing.status,
                correlation_id = %ctx,
                "Transfer already exists for idempotency key, returning it"
            );
            self.check_reuse(&existing, &intent)?;
            return Ok(existing);
        }

        // First sight of this key: atomically create the PENDING record.
        // Losing the create race is another replay, not an error.
        let transfer = match self.store.create(Transfer::pending(&intent)).await? {
            CreateOutcome::Created(t) => t,
            CreateOutcome::Existing(winner) => {
                info!(
                    key = %key,
                    transfer_id = %winner.id,
                    correlation_id = %ctx,
                    "Lost create race, observing winner's transfer"
                );
                self.check_reuse(&winner, &intent)?;
                return Ok(winner);
            }
        };

        info!(
            transfer_id = %transfer.id,
            correlation_id = %ctx,
            "Transfer created: {} -> {} amount={}",
            transfer.from_account,
            transfer.to_account,
            transfer.amount
        );

        self.execute(ctx, transfer).await
    }

    /// Run the PENDING transfer to its terminal state. Every failure from
    /// here on is captured into the transfer, never thrown past it.
    async fn execute(
        &self,
        ctx: RequestContext,
        transfer: Transfer,
    ) -> Result<Transfer, TransferError> {
        // Account checks, both sides
        let from_account = match self.ledger.get_account(&ctx, transfer.from_account).await {
            Ok(account) => account,
            Err(e) => return self.finish_failed(&ctx, transfer, &e.to_string()).await,
        };
        if let Err(e) = self.ledger.get_account(&ctx, transfer.to_account).await {
            return self.finish_failed(&ctx, transfer, &e.to_string()).await;
        }

        // Pre-check; the ledger re-checks during apply (defense in depth)
        if from_account.balance < transfer.amount {
            return self.finish_failed(&ctx, transfer, "Insufficient funds").await;
        }

        let outcome = self
            .ledger
            .apply_transfer(
                &ctx,
                transfer.id,
                transfer.from_account,
                transfer.to_account,
                transfer.amount,
                &transfer.idempotency_key,
            )
            .await;

        if outcome.success {
            self.finish(&ctx, transfer, TransferStatus::Completed, &outcome.message)
                .await
        } else {
            self.finish_failed(&ctx, transfer, &outcome.message).await
        }
    }

    async fn finish_failed(
        &self,
        ctx: &RequestContext,
        transfer: Transfer,
        message: &str,
    ) -> Result<Transfer, TransferError> {
        self.finish(ctx, transfer, TransferStatus::Failed, message)
            .await
    }

    /// Single persisted terminal write, then best-effort response caching
    async fn finish(
        &self,
        ctx: &RequestContext,
        mut transfer: Transfer,
        status: TransferStatus,
        message: &str,
    ) -> Result<Transfer, TransferError> {
        let completed_at = Utc::now();
        let moved = self
            .store
            .mark_terminal(transfer.id, status, message, completed_at)
            .await?;

        if !moved {
            // Already terminal (idempotent re-entry): surface the stored row
            warn!(
                transfer_id = %transfer.id,
                correlation_id = %ctx,
                "Terminal transition skipped, transfer already terminal"
            );
            return self.get_by_id(transfer.id).await;
        }

        transfer.status = status;
        transfer.message = Some(message.to_string());
        transfer.completed_at = Some(completed_at);

        match status {
            TransferStatus::Completed => {
                info!(transfer_id = %transfer.id, correlation_id = %ctx, "Transfer completed")
            }
            TransferStatus::Failed => {
                warn!(transfer_id = %transfer.id, correlation_id = %ctx, "Transfer failed: {}", message)
            }
            TransferStatus::Pending => {
                error!(transfer_id = %transfer.id, "Terminal write with PENDING status")
            }
        }

        // Cache-write failures must never abort a terminal transfer
        match serde_json::to_string(&transfer) {
            Ok(response) => {
                self.idempotency
                    .save(&transfer.idempotency_key, transfer.id, &response)
                    .await;
            }
            Err(e) => {
                error!(transfer_id = %transfer.id, error = %e, "Failed to serialize cached response");
            }
        }

        Ok(transfer)
    }

    fn check_reuse(&self, existing: &Transfer, intent: &TransferIntent) -> Result<(), TransferError> {
        if self.strict_idempotency && !existing.matches_intent(intent) {
            return Err(TransferError::Conflict(format!(
                "Idempotency key {} was already used with different parameters",
                intent.idempotency_key
            )));
        }
        Ok(())
    }

    /// Get a transfer by id
    pub async fn get_by_id(&self, id: TransferId) -> Result<Transfer, TransferError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or_else(|| TransferError::NotFound(format!("Transfer {}", id)))
    }

    /// Get a transfer by idempotency key
    pub async fn get_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        self.store.find_by_idempotency_key(key).await
    }
}

/// Input validation, before any persistence or remote call
fn validate_intent(intent: &TransferIntent) -> Result<(), TransferError> {
    if intent.idempotency_key.trim().is_empty() {
        return Err(TransferError::Validation(
            "Idempotency key is required".to_string(),
        ));
    }
    if intent.from_account == intent.to_account {
        return Err(TransferError::Validation(
            "Source and destination accounts must differ".to_string(),
        ));
    }
    if intent.amount <= Decimal::ZERO {
        return Err(TransferError::Validation(
            "Transfer amount must be positive".to_string(),
        ));
    }
    if intent.amount.normalize().scale() > 2 {
        return Err(TransferError::Validation(
            "Transfer amount supports at most 2 decimal places".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(amount: &str, key: &str) -> TransferIntent {
        TransferIntent::new(1, 2, amount.parse().unwrap(), key)
    }

    #[test]
    fn test_validate_accepts_well_formed_intent() {
        assert!(validate_intent(&intent("10.50", "k1")).is_ok());
        assert!(validate_intent(&intent("0.01", "k1")).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_key() {
        let mut bad = intent("10.00", "");
        assert!(matches!(
            validate_intent(&bad),
            Err(TransferError::Validation(_))
        ));
        bad.idempotency_key = "   ".to_string();
        assert!(matches!(
            validate_intent(&bad),
            Err(TransferError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_same_account() {
        let bad = TransferIntent::new(7, 7, "10.00".parse().unwrap(), "k1");
        assert!(matches!(
            validate_intent(&bad),
            Err(TransferError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_non_positive_amount() {
        assert!(validate_intent(&intent("0", "k1")).is_err());
        assert!(validate_intent(&intent("-5.00", "k1")).is_err());
    }

    #[test]
    fn test_validate_rejects_excess_precision() {
        assert!(validate_intent(&intent("10.001", "k1")).is_err());
        // Trailing zeros beyond scale 2 are not material precision
        assert!(validate_intent(&intent("10.500", "k1")).is_ok());
    }
}
