//! Idempotency Store
//!
//! Caches the terminal response for a completed orchestration under the
//! caller's idempotency key, with a fixed TTL (default 24h). Loss of a cache
//! entry must never abort a transfer that already reached a terminal state:
//! `save` logs persistence failures and swallows them, and the transfer's
//! own durable record stays authoritative.
//!
//! A periodic sweep deletes expired records; it is best-effort and never
//! blocks orchestration.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::transfer::TransferId;

/// Cached terminal response for one idempotency key
#[derive(Debug, Clone)]
pub struct IdempotencyRecord {
    pub key: String,
    /// Back-reference to the transfer; lookup only, no ownership
    pub transfer_id: TransferId,
    /// Serialized terminal outcome, returned verbatim on replay
    pub cached_response: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Look up a non-expired record. Expired rows are excluded, never
    /// returned as a soft signal; store errors degrade to a miss.
    async fn lookup(&self, key: &str) -> Option<IdempotencyRecord>;

    /// Cache the terminal response. Best-effort: failures are logged and
    /// swallowed.
    async fn save(&self, key: &str, transfer_id: TransferId, response: &str);

    /// Delete expired records, returning how many were removed.
    async fn sweep(&self) -> u64;
}

/// Spawn the background sweep loop (default interval: hourly)
pub fn spawn_sweeper(store: Arc<dyn IdempotencyStore>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so startup stays quiet
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let deleted = store.sweep().await;
            info!(deleted, "Cleaned up expired idempotency records");
        }
    })
}

// ============================================================================
// PostgreSQL implementation
// ============================================================================

pub struct PgIdempotencyStore {
    pool: PgPool,
    ttl: ChronoDuration,
}

impl PgIdempotencyStore {
    pub fn new(pool: PgPool, ttl_hours: i64) -> Self {
        Self {
            pool,
            ttl: ChronoDuration::hours(ttl_hours),
        }
    }
}

#[async_trait]
impl IdempotencyStore for PgIdempotencyStore {
    async fn lookup(&self, key: &str) -> Option<IdempotencyRecord> {
        let row = sqlx::query(
            r#"
            SELECT idempotency_key, transfer_id, cached_response, created_at, expires_at
            FROM idempotency_records_tb
            WHERE idempotency_key = $1 AND expires_at > NOW()
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;

        let row = match row {
            Ok(row) => row?,
            Err(e) => {
                // Degrade to a miss: the transfer store is authoritative
                warn!(key, error = %e, "Idempotency lookup failed, treating as miss");
                return None;
            }
        };

        let transfer_id: TransferId = match row.get::<String, _>("transfer_id").parse() {
            Ok(id) => id,
            Err(_) => {
                warn!(key, "Idempotency record has malformed transfer id, treating as miss");
                return None;
            }
        };

        Some(IdempotencyRecord {
            key: row.get("idempotency_key"),
            transfer_id,
            cached_response: row.get("cached_response"),
            created_at: row.get("created_at"),
            expires_at: row.get("expires_at"),
        })
    }

    async fn save(&self, key: &str, transfer_id: TransferId, response: &str) {
        let now = Utc::now();
        let result = sqlx::query(
            r#"
            INSERT INTO idempotency_records_tb
                (idempotency_key, transfer_id, cached_response, created_at, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (idempotency_key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(transfer_id.to_string())
        .bind(response)
        .bind(now)
        .bind(now + self.ttl)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            // Non-fatal: the transfer already reached its terminal state
            error!(key, error = %e, "Failed to save idempotency record");
        }
    }

    async fn sweep(&self) -> u64 {
        match sqlx::query("DELETE FROM idempotency_records_tb WHERE expires_at < NOW()")
            .execute(&self.pool)
            .await
        {
            Ok(result) => result.rows_affected(),
            Err(e) => {
                warn!(error = %e, "Idempotency sweep failed");
                0
            }
        }
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// DashMap-backed store for dev mode and tests
#[derive(Default)]
pub struct MemoryIdempotencyStore {
    records: DashMap<String, IdempotencyRecord>,
    ttl_hours: i64,
    /// Simulate persistence failure on save (tests only)
    fail_saves: std::sync::atomic::AtomicBool,
}

impl MemoryIdempotencyStore {
    pub fn new(ttl_hours: i64) -> Self {
        Self {
            records: DashMap::new(),
            ttl_hours,
            fail_saves: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves
            .store(fail, std::sync::atomic::Ordering::SeqCst);
    }

    /// Insert a record with explicit timestamps (expiry tests)
    pub fn insert_raw(&self, record: IdempotencyRecord) {
        self.records.insert(record.key.clone(), record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn lookup(&self, key: &str) -> Option<IdempotencyRecord> {
        let record = self.records.get(key)?;
        if record.expires_at <= Utc::now() {
            return None;
        }
        Some(record.clone())
    }

    async fn save(&self, key: &str, transfer_id: TransferId, response: &str) {
        if self.fail_saves.load(std::sync::atomic::Ordering::SeqCst) {
            error!(key, "Failed to save idempotency record");
            return;
        }

        let now = Utc::now();
        let record = IdempotencyRecord {
            key: key.to_string(),
            transfer_id,
            cached_response: response.to_string(),
            created_at: now,
            expires_at: now + ChronoDuration::hours(self.ttl_hours),
        };
        self.records.entry(key.to_string()).or_insert(record);
        debug!(key, transfer_id = %transfer_id, "Cached idempotent response");
    }

    async fn sweep(&self) -> u64 {
        let now = Utc::now();
        let before = self.records.len();
        self.records.retain(|_, record| record.expires_at >= now);
        (before - self.records.len()) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired_record(key: &str) -> IdempotencyRecord {
        let past = Utc::now() - ChronoDuration::hours(25);
        IdempotencyRecord {
            key: key.to_string(),
            transfer_id: TransferId::new(),
            cached_response: "{}".to_string(),
            created_at: past,
            expires_at: past + ChronoDuration::hours(24),
        }
    }

    #[tokio::test]
    async fn test_save_then_lookup() {
        let store = MemoryIdempotencyStore::new(24);
        let id = TransferId::new();

        store.save("k1", id, "{\"status\":\"COMPLETED\"}").await;

        let record = store.lookup("k1").await.unwrap();
        assert_eq!(record.transfer_id, id);
        assert_eq!(record.cached_response, "{\"status\":\"COMPLETED\"}");
        assert!(record.expires_at > record.created_at);
    }

    #[tokio::test]
    async fn test_expired_record_is_excluded() {
        let store = MemoryIdempotencyStore::new(24);
        store.insert_raw(expired_record("k1"));

        assert!(store.lookup("k1").await.is_none());
        // The row still exists until the sweep runs
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = MemoryIdempotencyStore::new(24);
        store.insert_raw(expired_record("old"));
        store.save("fresh", TransferId::new(), "{}").await;

        let deleted = store.sweep().await;
        assert_eq!(deleted, 1);
        assert_eq!(store.len(), 1);
        assert!(store.lookup("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_save_failure_is_swallowed() {
        let store = MemoryIdempotencyStore::new(24);
        store.set_fail_saves(true);

        // Must not panic or error: the caller never observes the failure
        store.save("k1", TransferId::new(), "{}").await;
        assert!(store.lookup("k1").await.is_none());
    }

    #[tokio::test]
    async fn test_first_writer_wins() {
        let store = MemoryIdempotencyStore::new(24);
        let first = TransferId::new();
        let second = TransferId::new();

        store.save("k1", first, "first").await;
        store.save("k1", second, "second").await;

        let record = store.lookup("k1").await.unwrap();
        assert_eq!(record.transfer_id, first);
        assert_eq!(record.cached_response, "first");
    }
}
