//! Transfer Error Types
//!
//! Error taxonomy for the orchestration engine. Validation failures are the
//! only errors surfaced before a PENDING record exists; everything after
//! that point is folded into the transfer's terminal status instead.

use thiserror::Error;

/// Transfer error types
///
/// Error codes are stable strings used in API responses.
#[derive(Error, Debug, Clone)]
pub enum TransferError {
    /// Bad input, rejected before any persistence or remote call
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Unknown transfer or account
    #[error("Not found: {0}")]
    NotFound(String),

    /// Idempotency-key reuse with materially different parameters
    /// (strict policy only)
    #[error("Idempotency key conflict: {0}")]
    Conflict(String),

    /// Ledger unreachable or circuit open
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Persistence failure unrelated to business rules
    #[error("Database error: {0}")]
    Database(String),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransferError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::Validation(_) => "VALIDATION_ERROR",
            TransferError::NotFound(_) => "NOT_FOUND",
            TransferError::Conflict(_) => "IDEMPOTENCY_CONFLICT",
            TransferError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            TransferError::Database(_) => "DATABASE_ERROR",
            TransferError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            TransferError::Validation(_) => 400,
            TransferError::NotFound(_) => 404,
            TransferError::Conflict(_) => 409,
            TransferError::ServiceUnavailable(_) => 503,
            TransferError::Database(_) | TransferError::Internal(_) => 500,
        }
    }
}

impl From<sqlx::Error> for TransferError {
    fn from(e: sqlx::Error) -> Self {
        TransferError::Database(e.to_string())
    }
}

impl From<anyhow::Error> for TransferError {
    fn from(e: anyhow::Error) -> Self {
        TransferError::Internal(e.to_string())
    }
}
