//! Resilient Ledger Access
//!
//! All network interaction with the external ledger service lives here,
//! fronted by retry and a circuit breaker so failures are bounded and
//! observable rather than cascading.
//!
//! # Layers
//!
//! ```text
//! Orchestrator -> ResilientLedgerClient -> CircuitBreaker + RetryPolicy -> LedgerClient (HTTP)
//! ```
//!
//! # Invariants
//!
//! 1. One breaker per operation class, process-wide (the ledger's health is
//!    a shared resource)
//! 2. Rejected or exhausted calls surface a typed fallback outcome, never a
//!    raw transport error
//! 3. `AccountNotFound` is a business answer, not a failure signal

pub mod breaker;
pub mod client;
pub mod resilient;
pub mod retry;
pub mod types;

// Re-exports for convenience
pub use breaker::{BreakerConfig, BreakerRegistry, CircuitBreaker, CircuitState, Clock, SystemClock};
pub use client::{HttpLedgerClient, LedgerClient};
pub use resilient::ResilientLedgerClient;
pub use retry::{Backoff, ExponentialBackoff, NoBackoff, RetryPolicy};
pub use types::{Account, LedgerError, LedgerOutcome, LedgerTransferRequest};
