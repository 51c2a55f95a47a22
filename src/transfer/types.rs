//! Transfer Core Types
//!
//! Type definitions for the transfer orchestration engine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::state::TransferStatus;

/// Account identifier in the external ledger service
pub type AccountId = i64;

/// Transfer ID - ULID-based unique identifier
///
/// Using ULID provides:
/// - Monotonic, sortable IDs
/// - No coordination needed between workers
/// - 128-bit with good entropy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(ulid::Ulid);

impl TransferId {
    /// Generate a new unique TransferId
    pub fn new() -> Self {
        Self(ulid::Ulid::new())
    }
}

impl Default for TransferId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TransferId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(ulid::Ulid::from_string(s)?))
    }
}

impl Serialize for TransferId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for TransferId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Transfer intent from the caller
#[derive(Debug, Clone)]
pub struct TransferIntent {
    /// Source ledger account
    pub from_account: AccountId,
    /// Destination ledger account
    pub to_account: AccountId,
    /// Amount, positive, at most 2 fractional digits
    pub amount: Decimal,
    /// Caller-supplied deduplication token, opaque, non-empty
    pub idempotency_key: String,
}

impl TransferIntent {
    pub fn new(
        from_account: AccountId,
        to_account: AccountId,
        amount: Decimal,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            from_account,
            to_account,
            amount,
            idempotency_key: idempotency_key.into(),
        }
    }
}

/// One funds-movement attempt
///
/// Created PENDING on first sight of an idempotency key, moved exactly once
/// to a terminal status by the orchestrator. Serde format doubles as the
/// cached idempotency response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    /// Unique transfer ID (ULID, also the DB primary key)
    pub id: TransferId,
    /// Caller-supplied deduplication token, unique across transfers
    pub idempotency_key: String,
    /// Source ledger account
    pub from_account: AccountId,
    /// Destination ledger account
    pub to_account: AccountId,
    /// Amount with 2-digit scale
    pub amount: Decimal,
    /// Current lifecycle status
    pub status: TransferStatus,
    /// Outcome detail, set on transition to a terminal status
    pub message: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Set only on terminal transition
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transfer {
    /// Create a new PENDING transfer for an intent
    pub fn pending(intent: &TransferIntent) -> Self {
        Self {
            id: TransferId::new(),
            idempotency_key: intent.idempotency_key.clone(),
            from_account: intent.from_account,
            to_account: intent.to_account,
            amount: intent.amount,
            status: TransferStatus::Pending,
            message: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Check whether an intent carries the same parameters as this record.
    /// Used by the strict idempotency policy to detect key reuse.
    pub fn matches_intent(&self, intent: &TransferIntent) -> bool {
        self.from_account == intent.from_account
            && self.to_account == intent.to_account
            && self.amount == intent.amount
    }
}

impl fmt::Display for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Transfer[{}] {} -> {} amount={} status={}",
            self.id, self.from_account, self.to_account, self.amount, self.status
        )
    }
}
