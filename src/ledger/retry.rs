//! Retry Policy
//!
//! Attempt budget with injectable backoff, so tests run with zero delay and
//! production gets exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

/// Delay schedule between attempts. Attempt numbers start at 1.
pub trait Backoff: Send + Sync {
    fn delay(&self, attempt: u32) -> Duration;
}

/// Exponential backoff with random jitter
///
/// delay(n) = base * 2^(n-1) + jitter in [0, base)
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base: Duration,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base }
    }
}

impl Backoff for ExponentialBackoff {
    fn delay(&self, attempt: u32) -> Duration {
        let exp = self.base.saturating_mul(1u32 << (attempt - 1).min(16));
        let jitter_ms = rand::thread_rng().gen_range(0..self.base.as_millis().max(1) as u64);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Zero-delay backoff for deterministic tests
#[derive(Debug, Clone, Default)]
pub struct NoBackoff;

impl Backoff for NoBackoff {
    fn delay(&self, _attempt: u32) -> Duration {
        Duration::ZERO
    }
}

/// Retry budget for one remote operation
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: std::sync::Arc<dyn Backoff>,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: std::sync::Arc<dyn Backoff>) -> Self {
        // At least one attempt always runs
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Sleep before retrying `attempt` (the attempt just failed)
    pub async fn wait(&self, attempt: u32) {
        let delay = self.backoff.delay(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
