//! Ledger Wire Types
//!
//! Request/response shapes for the external ledger service.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::transfer::AccountId;

/// Account as reported by `GET /accounts/{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub balance: Decimal,
}

/// Outcome of `POST /ledger/transfer`
///
/// `success = false` covers both business rejections reported by the ledger
/// and the synthesized fallback when the ledger cannot be reached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerOutcome {
    pub success: bool,
    pub message: String,
}

impl LedgerOutcome {
    /// Fallback outcome used when the call is rejected by the breaker or
    /// exhausts its retry budget. Deterministic so the orchestrator can
    /// treat "ledger unavailable" as a typed outcome.
    pub fn unavailable_fallback() -> Self {
        Self {
            success: false,
            message: "Ledger service temporarily unavailable. Please try again later.".to_string(),
        }
    }
}

/// Request body for `POST /ledger/transfer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerTransferRequest {
    pub transfer_id: String,
    pub from_account_id: AccountId,
    pub to_account_id: AccountId,
    pub amount: Decimal,
}

/// Errors surfaced by the ledger client
#[derive(Error, Debug, Clone)]
pub enum LedgerError {
    /// The ledger answered 404 for the account. A business outcome, not a
    /// transport failure: never retried, never counted against the breaker.
    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    /// Transport failure, 5xx, or timeout. Retried, counted as breaker failure.
    #[error("Ledger service unavailable: {0}")]
    Unavailable(String),
}

impl LedgerError {
    /// Transient errors are retried and recorded as breaker failures
    #[inline]
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Unavailable(_))
    }
}
