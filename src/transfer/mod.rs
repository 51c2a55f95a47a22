//! Idempotent Transfer Orchestration
//!
//! Moves funds between two accounts in an external ledger service with
//! exactly-once submission semantics: every request carries a caller-supplied
//! idempotency key, and replays observe the original outcome instead of
//! moving money twice.
//!
//! # State Machine
//!
//! ```text
//! PENDING → COMPLETED
//!    ↓
//! FAILED
//! ```
//!
//! Terminal states never transition again; the terminal write is a single
//! compare-and-set against PENDING.
//!
//! # Safety Invariants
//!
//! 1. **Validate-Before-Persist**: Input validation runs before any record
//!    is created or any ledger call is made
//! 2. **One-Record-Per-Key**: The atomic create on the idempotency key is
//!    the deduplication point for concurrent duplicates
//! 3. **Single-Terminal-Write**: A transfer reaches its terminal status in
//!    exactly one persisted write
//! 4. **Cache-Is-Advisory**: Losing an idempotency cache entry degrades to a
//!    store lookup, never to a second funds movement

pub mod dispatcher;
pub mod error;
pub mod orchestrator;
pub mod state;
pub mod store;
pub mod types;


// Re-exports for convenience
pub use dispatcher::{BatchDispatcher, DEFAULT_MAX_BATCH_SIZE, DEFAULT_WORKER_COUNT};
pub use error::TransferError;
pub use orchestrator::TransferOrchestrator;
pub use state::TransferStatus;
pub use store::{CreateOutcome, MemoryTransferStore, PgTransferStore, TransferStore};
pub use types::{AccountId, Transfer, TransferId, TransferIntent};
