//! Resilient Ledger Client
//!
//! Wraps a [`LedgerClient`] with retry and circuit breaking so ledger
//! failures are bounded and observable instead of cascading. When a call is
//! rejected by the breaker or exhausts its retry budget, the caller gets a
//! deterministic fallback outcome, never a raw transport error.

use std::sync::{Arc, Mutex};

use rust_decimal::Decimal;
use tracing::warn;

use super::breaker::{BreakerRegistry, CircuitBreaker};
use super::client::LedgerClient;
use super::retry::RetryPolicy;
use super::types::{Account, LedgerError, LedgerOutcome};
use crate::context::RequestContext;
use crate::transfer::{AccountId, TransferId};

/// Operation class shared by both ledger calls; one breaker guards them,
/// mirroring that they hit the same remote service.
const LEDGER_BREAKER: &str = "ledger";

pub struct ResilientLedgerClient {
    inner: Arc<dyn LedgerClient>,
    breaker: Arc<Mutex<CircuitBreaker>>,
    retry: RetryPolicy,
}

impl ResilientLedgerClient {
    pub fn new(inner: Arc<dyn LedgerClient>, registry: &BreakerRegistry, retry: RetryPolicy) -> Self {
        Self {
            inner,
            breaker: registry.get(LEDGER_BREAKER),
            retry,
        }
    }

    /// Fetch an account, retrying transient failures.
    ///
    /// `AccountNotFound` is a business answer from a healthy ledger: it is
    /// returned immediately and recorded as a breaker success.
    pub async fn get_account(
        &self,
        ctx: &RequestContext,
        account_id: AccountId,
    ) -> Result<Account, LedgerError> {
        for attempt in 1..=self.retry.max_attempts() {
            if !self.try_acquire() {
                if attempt < self.retry.max_attempts() {
                    self.retry.wait(attempt).await;
                }
                continue;
            }

            match self.inner.get_account(ctx, account_id).await {
                Ok(account) => {
                    self.record(true);
                    return Ok(account);
                }
                Err(e) if !e.is_transient() => {
                    self.record(true);
                    return Err(e);
                }
                Err(e) => {
                    self.record(false);
                    warn!(
                        account_id,
                        attempt,
                        correlation_id = %ctx,
                        error = %e,
                        "Account lookup attempt failed"
                    );
                    if attempt < self.retry.max_attempts() {
                        self.retry.wait(attempt).await;
                    }
                }
            }
        }

        Err(LedgerError::Unavailable(
            "Ledger unreachable after retries".to_string(),
        ))
    }

    /// Apply a transfer at the ledger.
    ///
    /// Always resolves to a [`LedgerOutcome`]: breaker rejections and
    /// exhausted retries yield the unavailable fallback with
    /// `success = false`.
    pub async fn apply_transfer(
        &self,
        ctx: &RequestContext,
        transfer_id: TransferId,
        from_account: AccountId,
        to_account: AccountId,
        amount: Decimal,
        idempotency_key: &str,
    ) -> LedgerOutcome {
        for attempt in 1..=self.retry.max_attempts() {
            if !self.try_acquire() {
                if attempt < self.retry.max_attempts() {
                    self.retry.wait(attempt).await;
                }
                continue;
            }

            match self
                .inner
                .apply_transfer(
                    ctx,
                    transfer_id,
                    from_account,
                    to_account,
                    amount,
                    idempotency_key,
                )
                .await
            {
                Ok(outcome) => {
                    self.record(true);
                    return outcome;
                }
                Err(e) => {
                    self.record(false);
                    warn!(
                        transfer_id = %transfer_id,
                        attempt,
                        correlation_id = %ctx,
                        error = %e,
                        "Transfer apply attempt failed"
                    );
                    if attempt < self.retry.max_attempts() {
                        self.retry.wait(attempt).await;
                    }
                }
            }
        }

        warn!(
            transfer_id = %transfer_id,
            correlation_id = %ctx,
            "Falling back: ledger unavailable"
        );
        LedgerOutcome::unavailable_fallback()
    }

    fn try_acquire(&self) -> bool {
        self.breaker.lock().unwrap().try_acquire()
    }

    fn record(&self, success: bool) {
        let mut breaker = self.breaker.lock().unwrap();
        if success {
            breaker.record_success();
        } else {
            breaker.record_failure();
        }
    }
}
