//! Transfer Record Store
//!
//! Durable mapping from transfer id (and idempotency key) to transfer state.
//! `create` is atomic on the idempotency-key unique constraint: when two
//! callers race, exactly one insert wins and the loser observes the winner's
//! record. This is the linchpin for exactly-once semantics under concurrent
//! duplicate submissions.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use sqlx::{PgPool, Row};

use super::error::TransferError;
use super::state::TransferStatus;
use super::types::{Transfer, TransferId};

/// Result of an atomic create
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    /// This caller's insert won; the record is fresh and PENDING
    Created(Transfer),
    /// Another submission with the same idempotency key got there first
    Existing(Transfer),
}

#[async_trait]
pub trait TransferStore: Send + Sync {
    /// Insert a PENDING transfer, atomically with respect to the
    /// idempotency-key uniqueness constraint.
    async fn create(&self, transfer: Transfer) -> Result<CreateOutcome, TransferError>;

    async fn find_by_id(&self, id: TransferId) -> Result<Option<Transfer>, TransferError>;

    async fn find_by_idempotency_key(&self, key: &str)
    -> Result<Option<Transfer>, TransferError>;

    /// Move a PENDING transfer to a terminal status in one persisted write.
    /// Returns false if the transfer was already terminal (idempotent
    /// re-entry, not an error).
    async fn mark_terminal(
        &self,
        id: TransferId,
        status: TransferStatus,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, TransferError>;
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

pub struct PgTransferStore {
    pool: PgPool,
}

impl PgTransferStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn row_to_transfer(row: &sqlx::postgres::PgRow) -> Result<Transfer, TransferError> {
        let id_str: String = row.get("id");
        let id: TransferId = id_str
            .parse()
            .map_err(|_| TransferError::Internal("Invalid transfer id format".to_string()))?;

        let status_id: i16 = row.get("status");
        let status = TransferStatus::from_id(status_id).ok_or_else(|| {
            TransferError::Internal(format!("Invalid status ID: {}", status_id))
        })?;

        Ok(Transfer {
            id,
            idempotency_key: row.get("idempotency_key"),
            from_account: row.get("from_account"),
            to_account: row.get("to_account"),
            amount: row.get("amount"),
            status,
            message: row.get("message"),
            created_at: row.get("created_at"),
            completed_at: row.get("completed_at"),
        })
    }
}

const SELECT_COLUMNS: &str = "id, idempotency_key, from_account, to_account, amount, \
                              status, message, created_at, completed_at";

#[async_trait]
impl TransferStore for PgTransferStore {
    async fn create(&self, transfer: Transfer) -> Result<CreateOutcome, TransferError> {
        let result = sqlx::query(
            r#"
            INSERT INTO transfers_tb
                (id, idempotency_key, from_account, to_account, amount, status, created_at)
            VALUES
                ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(transfer.id.to_string())
        .bind(&transfer.idempotency_key)
        .bind(transfer.from_account)
        .bind(transfer.to_account)
        .bind(transfer.amount)
        .bind(transfer.status.id())
        .bind(transfer.created_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(CreateOutcome::Created(transfer));
        }

        // Lost the race: observe the winner's record
        match self
            .find_by_idempotency_key(&transfer.idempotency_key)
            .await?
        {
            Some(winner) => Ok(CreateOutcome::Existing(winner)),
            None => Err(TransferError::Database(
                "Insert conflicted but winning row is missing".to_string(),
            )),
        }
    }

    async fn find_by_id(&self, id: TransferId) -> Result<Option<Transfer>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers_tb WHERE id = $1",
            SELECT_COLUMNS
        ))
        .bind(id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM transfers_tb WHERE idempotency_key = $1",
            SELECT_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_transfer).transpose()
    }

    async fn mark_terminal(
        &self,
        id: TransferId,
        status: TransferStatus,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        // CAS from PENDING: terminal states are final
        let result = sqlx::query(
            r#"
            UPDATE transfers_tb
            SET status = $1, message = $2, completed_at = $3
            WHERE id = $4 AND status = $5
            "#,
        )
        .bind(status.id())
        .bind(message)
        .bind(completed_at)
        .bind(id.to_string())
        .bind(TransferStatus::Pending.id())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// DashMap-backed store used in dev mode (no `postgres_url` configured) and
/// by the integration tests. Provides the same atomicity guarantee through
/// the map's entry API.
///
/// Locking rule: no method may hold a guard on one map while locking the
/// other. Shards of the two maps are otherwise free to collide, and holding
/// both in opposite orders from two tasks deadlocks.
#[derive(Default)]
pub struct MemoryTransferStore {
    by_key: DashMap<String, Transfer>,
    key_by_id: DashMap<TransferId, String>,
}

impl MemoryTransferStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of persisted transfers (test assertions)
    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

#[async_trait]
impl TransferStore for MemoryTransferStore {
    async fn create(&self, transfer: Transfer) -> Result<CreateOutcome, TransferError> {
        use dashmap::mapref::entry::Entry;

        // Reserve the id mapping before taking the by_key entry; the id is
        // unpublished until create returns, so a premature mapping is
        // invisible and a lost race just rolls it back
        self.key_by_id
            .insert(transfer.id, transfer.idempotency_key.clone());

        match self.by_key.entry(transfer.idempotency_key.clone()) {
            Entry::Occupied(existing) => {
                let winner = existing.get().clone();
                drop(existing);
                self.key_by_id.remove(&transfer.id);
                Ok(CreateOutcome::Existing(winner))
            }
            Entry::Vacant(slot) => {
                slot.insert(transfer.clone());
                Ok(CreateOutcome::Created(transfer))
            }
        }
    }

    async fn find_by_id(&self, id: TransferId) -> Result<Option<Transfer>, TransferError> {
        // Copy the key out so the key_by_id guard drops before locking by_key
        let Some(key) = self.key_by_id.get(&id).map(|k| k.value().clone()) else {
            return Ok(None);
        };
        Ok(self.by_key.get(&key).map(|t| t.clone()))
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<Transfer>, TransferError> {
        Ok(self.by_key.get(key).map(|t| t.clone()))
    }

    async fn mark_terminal(
        &self,
        id: TransferId,
        status: TransferStatus,
        message: &str,
        completed_at: DateTime<Utc>,
    ) -> Result<bool, TransferError> {
        let Some(key) = self.key_by_id.get(&id).map(|k| k.value().clone()) else {
            return Err(TransferError::NotFound(format!("Transfer {}", id)));
        };
        let Some(mut transfer) = self.by_key.get_mut(&key) else {
            return Err(TransferError::NotFound(format!("Transfer {}", id)));
        };

        if transfer.status.is_terminal() {
            return Ok(false);
        }

        transfer.status = status;
        transfer.message = Some(message.to_string());
        transfer.completed_at = Some(completed_at);
        Ok(true)
    }
}
