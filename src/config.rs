use serde::{Deserialize, Serialize};
use std::fs;

use crate::transfer::{DEFAULT_MAX_BATCH_SIZE, DEFAULT_WORKER_COUNT};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub server: ServerConfig,
    pub ledger: LedgerConfig,
    #[serde(default)]
    pub resilience: ResilienceConfig,
    #[serde(default)]
    pub orchestration: OrchestrationConfig,
    /// PostgreSQL connection URL; absent means in-memory stores (dev mode)
    #[serde(default)]
    pub postgres_url: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LedgerConfig {
    pub base_url: String,
    #[serde(default = "default_ledger_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_ledger_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResilienceConfig {
    pub retry_max_attempts: u32,
    pub retry_backoff_ms: u64,
    pub breaker_window_size: usize,
    pub breaker_failure_rate: f64,
    pub breaker_open_cooldown_secs: u64,
    pub breaker_half_open_trials: u32,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry_max_attempts: 3,
            retry_backoff_ms: 100,
            breaker_window_size: 10,
            breaker_failure_rate: 0.5,
            breaker_open_cooldown_secs: 30,
            breaker_half_open_trials: 3,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OrchestrationConfig {
    pub worker_count: usize,
    pub max_batch_size: usize,
    pub idempotency_ttl_hours: i64,
    pub sweep_interval_secs: u64,
    /// Reject idempotency-key reuse with different parameters (409) instead
    /// of replaying the original outcome
    pub strict_idempotency: bool,
}

impl Default for OrchestrationConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            idempotency_ttl_hours: 24,
            sweep_interval_secs: 3600,
            strict_idempotency: false,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> Self {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .unwrap_or_else(|_| panic!("Failed to read config file: {}", config_path));
        serde_yaml::from_str(&content).expect("Failed to parse config yaml")
    }
}
