//! Transfer Engine - Idempotent Transfer Orchestration
//!
//! Orchestrates funds movements against an external ledger service with
//! exactly-once submission semantics.
//!
//! # Modules
//!
//! - [`transfer`] - Transfer state machine, orchestrator, and batch dispatcher
//! - [`ledger`] - Resilient ledger client (retry + circuit breaker)
//! - [`idempotency`] - Response cache keyed by idempotency key, with TTL
//! - [`api`] - HTTP endpoints (axum)
//! - [`context`] - Correlation id propagation
//! - [`db`] - PostgreSQL pool and schema
//! - [`config`] - YAML configuration
//! - [`logging`] - tracing setup

pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod idempotency;
pub mod ledger;
pub mod logging;
pub mod transfer;

// Convenient re-exports at crate root
pub use context::RequestContext;
pub use idempotency::{IdempotencyRecord, IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore};
pub use ledger::{HttpLedgerClient, LedgerClient, ResilientLedgerClient};
pub use transfer::{
    AccountId, BatchDispatcher, Transfer, TransferError, TransferId, TransferIntent,
    TransferOrchestrator, TransferStatus,
};
