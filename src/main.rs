//! Transfer Engine - Idempotent Transfer Orchestration Service
//!
//! Entry point. Architecture:
//!
//! ```text
//! ┌──────────┐    ┌──────────────┐    ┌───────────────┐    ┌──────────┐
//! │  HTTP    │───▶│ Orchestrator │───▶│ Resilient     │───▶│  Ledger  │
//! │  (axum)  │    │ (FSM + idem) │    │ Client        │    │ (remote) │
//! └──────────┘    └──────────────┘    │ (retry + CB)  │    └──────────┘
//!                        │            └───────────────┘
//!                        ▼
//!                 ┌──────────────┐
//!                 │   Stores     │  PostgreSQL, or in-memory when no
//!                 │ (pg/memory)  │  postgres_url is configured
//!                 └──────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;

use transfer_engine::api::{self, AppState};
use transfer_engine::config::AppConfig;
use transfer_engine::db::Database;
use transfer_engine::idempotency::{
    IdempotencyStore, MemoryIdempotencyStore, PgIdempotencyStore, spawn_sweeper,
};
use transfer_engine::ledger::{
    BreakerConfig, BreakerRegistry, ExponentialBackoff, HttpLedgerClient, ResilientLedgerClient,
    RetryPolicy, SystemClock,
};
use transfer_engine::transfer::{
    BatchDispatcher, MemoryTransferStore, PgTransferStore, TransferOrchestrator, TransferStore,
};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

/// Get port override from command line (--port argument)
fn get_port_override() -> Option<u16> {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if args[i] == "--port" && i + 1 < args.len() {
            return args[i + 1].parse().ok();
        }
    }
    None
}

#[tokio::main]
async fn main() {
    let env = get_env();
    let config = AppConfig::load(&env);
    let _log_guard = transfer_engine::logging::init_logging(&config);

    tracing::info!("Starting Transfer Engine in {} mode", env);

    // Stores: PostgreSQL when configured, in-memory otherwise (dev mode)
    let mut database: Option<Arc<Database>> = None;
    let (transfer_store, idempotency_store): (Arc<dyn TransferStore>, Arc<dyn IdempotencyStore>) =
        if let Some(postgres_url) = &config.postgres_url {
            let db = match Database::connect(postgres_url).await {
                Ok(db) => Arc::new(db),
                Err(e) => {
                    eprintln!("❌ FATAL: Failed to connect to PostgreSQL: {}", e);
                    std::process::exit(1);
                }
            };
            if let Err(e) = db.ensure_schema().await {
                eprintln!("❌ FATAL: Failed to prepare schema: {}", e);
                std::process::exit(1);
            }
            println!("🗄️  PostgreSQL stores initialized");
            database = Some(db.clone());
            (
                Arc::new(PgTransferStore::new(db.pool().clone())),
                Arc::new(PgIdempotencyStore::new(
                    db.pool().clone(),
                    config.orchestration.idempotency_ttl_hours,
                )),
            )
        } else {
            println!("⚠️  No postgres_url configured, using in-memory stores");
            (
                Arc::new(MemoryTransferStore::new()),
                Arc::new(MemoryIdempotencyStore::new(
                    config.orchestration.idempotency_ttl_hours,
                )),
            )
        };

    // Resilient ledger client
    let resilience = &config.resilience;
    let registry = BreakerRegistry::new(
        BreakerConfig {
            window_size: resilience.breaker_window_size,
            failure_rate_threshold: resilience.breaker_failure_rate,
            open_cooldown: Duration::from_secs(resilience.breaker_open_cooldown_secs),
            half_open_trials: resilience.breaker_half_open_trials,
        },
        Arc::new(SystemClock),
    );
    let http_client = Arc::new(HttpLedgerClient::new(
        config.ledger.base_url.clone(),
        Duration::from_millis(config.ledger.timeout_ms),
    ));
    let retry = RetryPolicy::new(
        resilience.retry_max_attempts,
        Arc::new(ExponentialBackoff::new(Duration::from_millis(
            resilience.retry_backoff_ms,
        ))),
    );
    let ledger = Arc::new(ResilientLedgerClient::new(http_client, &registry, retry));
    println!("🔌 Ledger client targeting {}", config.ledger.base_url);

    // Orchestrator and batch dispatcher
    let orchestrator = Arc::new(
        TransferOrchestrator::new(transfer_store, idempotency_store.clone(), ledger)
            .with_strict_idempotency(config.orchestration.strict_idempotency),
    );
    let dispatcher = Arc::new(BatchDispatcher::new(
        orchestrator.clone(),
        config.orchestration.worker_count,
        config.orchestration.max_batch_size,
    ));

    // Background sweep for expired idempotency records
    spawn_sweeper(
        idempotency_store,
        Duration::from_secs(config.orchestration.sweep_interval_secs),
    );

    let state = Arc::new(AppState {
        orchestrator,
        dispatcher,
        database,
    });
    let app = api::router(state);

    let port = get_port_override().unwrap_or(config.server.port);
    let addr = format!("{}:{}", config.server.host, port);
    let listener = match TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            eprintln!("❌ FATAL: Failed to bind to {}: {}", addr, e);
            eprintln!(
                "   Hint: Port {} may already be in use. Check with: lsof -i :{}",
                port, port
            );
            std::process::exit(1);
        }
    };

    println!("🚀 Transfer Engine listening on http://{}", addr);
    println!("📂 API: POST /api/v1/transfers, POST /api/v1/transfers/batch");

    if let Err(e) = axum::serve(listener, app).await {
        eprintln!("❌ FATAL: Server error: {}", e);
        std::process::exit(1);
    }
}
