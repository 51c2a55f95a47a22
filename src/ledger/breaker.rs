//! Circuit Breaker
//!
//! Count-based sliding-window breaker guarding the ledger service. One
//! breaker exists per remote operation class, shared process-wide through
//! [`BreakerRegistry`] - this is the only global mutable state in the core,
//! and every per-call update happens under a single lock so the rolling
//! window never observes a partial update.
//!
//! # State Machine
//!
//! ```text
//! CLOSED --(failure rate >= threshold, window full)--> OPEN
//! OPEN   --(cool-down elapsed)--> HALF_OPEN
//! HALF_OPEN --(all trial calls succeed)--> CLOSED
//! HALF_OPEN --(any trial failure)--> OPEN
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{info, warn};

/// Injectable time source so tests can drive the cool-down deterministically
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// Wall-clock backed [`Clock`] used in production
#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker tuning knobs
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Number of most recent call outcomes tracked
    pub window_size: usize,
    /// Trip when failures / window_size reaches this rate and the window is full
    pub failure_rate_threshold: f64,
    /// How long the breaker stays OPEN before permitting trial calls
    pub open_cooldown: Duration,
    /// Trial calls permitted while HALF_OPEN; all must succeed to close
    pub half_open_trials: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_cooldown: Duration::from_secs(30),
            half_open_trials: 3,
        }
    }
}

/// Count-window circuit breaker for one operation class
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    state: CircuitState,
    /// Rolling window of recent outcomes, true = failure
    window: VecDeque<bool>,
    opened_at: Option<Instant>,
    trial_permits: u32,
    trial_successes: u32,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            clock,
            state: CircuitState::Closed,
            window: VecDeque::new(),
            opened_at: None,
            trial_permits: 0,
            trial_successes: 0,
        }
    }

    /// Current state, after applying any due OPEN -> HALF_OPEN transition
    pub fn state(&mut self) -> CircuitState {
        self.maybe_half_open();
        self.state
    }

    /// Ask permission to attempt a call. Returns false when the call must
    /// fail fast without touching the network.
    pub fn try_acquire(&mut self) -> bool {
        self.maybe_half_open();

        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                warn!(breaker = %self.name, "Circuit breaker call not permitted");
                false
            }
            CircuitState::HalfOpen => {
                if self.trial_permits > 0 {
                    self.trial_permits -= 1;
                    true
                } else {
                    warn!(breaker = %self.name, "Circuit breaker trial budget exhausted");
                    false
                }
            }
        }
    }

    /// Record a successful call outcome
    pub fn record_success(&mut self) {
        match self.state {
            CircuitState::Closed => self.push_outcome(false),
            CircuitState::HalfOpen => {
                self.trial_successes += 1;
                if self.trial_successes >= self.config.half_open_trials {
                    self.transition(CircuitState::Closed);
                    self.window.clear();
                    self.opened_at = None;
                }
            }
            // Late result from a call dispatched before the trip
            CircuitState::Open => {}
        }
    }

    /// Record a failed call outcome
    pub fn record_failure(&mut self) {
        match self.state {
            CircuitState::Closed => {
                self.push_outcome(true);
                if self.window.len() >= self.config.window_size {
                    let failures = self.window.iter().filter(|&&f| f).count();
                    let rate = failures as f64 / self.window.len() as f64;
                    if rate >= self.config.failure_rate_threshold {
                        warn!(
                            breaker = %self.name,
                            failure_rate = rate,
                            "Circuit breaker failure rate exceeded"
                        );
                        self.trip();
                    }
                }
            }
            CircuitState::HalfOpen => {
                // Any trial failure reopens immediately
                self.trip();
            }
            CircuitState::Open => {}
        }
    }

    fn push_outcome(&mut self, failure: bool) {
        self.window.push_back(failure);
        while self.window.len() > self.config.window_size {
            self.window.pop_front();
        }
    }

    fn trip(&mut self) {
        self.transition(CircuitState::Open);
        self.opened_at = Some(self.clock.now());
        self.window.clear();
    }

    fn maybe_half_open(&mut self) {
        if self.state == CircuitState::Open
            && let Some(opened_at) = self.opened_at
            && self.clock.now().duration_since(opened_at) >= self.config.open_cooldown
        {
            self.transition(CircuitState::HalfOpen);
            self.trial_permits = self.config.half_open_trials;
            self.trial_successes = 0;
        }
    }

    fn transition(&mut self, to: CircuitState) {
        if self.state != to {
            info!(
                breaker = %self.name,
                from = %self.state,
                to = %to,
                "Circuit breaker state transition"
            );
            self.state = to;
        }
    }
}

/// Process-wide breaker registry keyed by operation class
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<Mutex<CircuitBreaker>>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            breakers: DashMap::new(),
            config,
            clock,
        }
    }

    /// Get or create the breaker for an operation class
    pub fn get(&self, name: &str) -> Arc<Mutex<CircuitBreaker>> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(CircuitBreaker::new(
                    name,
                    self.config.clone(),
                    self.clock.clone(),
                )))
            })
            .clone()
    }
}

#[cfg(test)]
pub mod test_clock {
    use super::*;

    /// Manually advanced clock for deterministic cool-down tests
    pub struct ManualClock {
        now: Mutex<Instant>,
    }

    impl ManualClock {
        pub fn new() -> Self {
            Self {
                now: Mutex::new(Instant::now()),
            }
        }

        pub fn advance(&self, by: Duration) {
            let mut now = self.now.lock().unwrap();
            *now += by;
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            *self.now.lock().unwrap()
        }
    }
}
