//! HTTP API Layer
//!
//! Axum handlers for the transfer endpoints. The idempotency key arrives in
//! the `Idempotency-Key` header (a body field is accepted as a fallback for
//! batch items); `X-Correlation-ID` is honored when the caller supplies one
//! and generated otherwise.

use std::str::FromStr;
use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::context::RequestContext;
use crate::db::Database;
use crate::transfer::{
    BatchDispatcher, Transfer, TransferError, TransferId, TransferIntent, TransferOrchestrator,
};

const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";
const CORRELATION_HEADER: &str = "X-Correlation-ID";

/// Shared handler state
pub struct AppState {
    pub orchestrator: Arc<TransferOrchestrator>,
    pub dispatcher: Arc<BatchDispatcher>,
    /// Present only when running on PostgreSQL; health degrades to a pure
    /// liveness check on the in-memory stores
    pub database: Option<Arc<Database>>,
}

/// Build the transfer API router
pub fn router(state: Arc<AppState>) -> axum::Router {
    axum::Router::new()
        .route("/api/v1/health", get(health_check))
        .route("/api/v1/transfers", post(create_transfer))
        .route("/api/v1/transfers/batch", post(create_transfer_batch))
        .route("/api/v1/transfers/{transfer_id}", get(get_transfer))
        .with_state(state)
}

// ============================================================================
// API Request/Response Types
// ============================================================================

/// API request for creating a transfer
#[derive(Debug, Deserialize)]
pub struct TransferApiRequest {
    /// Source ledger account id
    pub from_account: i64,
    /// Target ledger account id
    pub to_account: i64,
    /// Amount as string (to avoid float precision issues)
    pub amount: String,
    /// Per-item idempotency key; the header wins for single transfers
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

/// API response for transfer operations
#[derive(Debug, Serialize)]
pub struct TransferApiResponse {
    pub transfer_id: String,
    pub idempotency_key: String,
    pub status: String,
    pub from_account: i64,
    pub to_account: i64,
    /// Amount as string
    pub amount: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

impl From<Transfer> for TransferApiResponse {
    fn from(t: Transfer) -> Self {
        Self {
            transfer_id: t.id.to_string(),
            idempotency_key: t.idempotency_key,
            status: t.status.as_str().to_string(),
            from_account: t.from_account,
            to_account: t.to_account,
            amount: t.amount.to_string(),
            message: t.message,
            created_at: t.created_at.to_rfc3339(),
            completed_at: t.completed_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

/// API request for batch dispatch
#[derive(Debug, Deserialize)]
pub struct BatchApiRequest {
    pub transfers: Vec<TransferApiRequest>,
}

/// Per-item outcome within a batch response, index-aligned with the request
#[derive(Debug, Serialize)]
pub struct BatchApiResponse {
    pub results: Vec<ApiResponse<TransferApiResponse>>,
}

/// API wrapper for standard response format
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub msg: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            data: Some(data),
            msg: None,
        }
    }

    pub fn error(code: i32, msg: impl ToString) -> Self {
        Self {
            code,
            data: None,
            msg: Some(msg.to_string()),
        }
    }
}

// ============================================================================
// Error Codes
// ============================================================================

pub mod error_codes {
    pub const INVALID_PARAMETER: i32 = -1001;
    pub const IDEMPOTENCY_CONFLICT: i32 = -3001;
    pub const SERVICE_UNAVAILABLE: i32 = -5001;
    pub const DATABASE_ERROR: i32 = -5002;
    pub const INTERNAL_ERROR: i32 = -5000;
    pub const TRANSFER_NOT_FOUND: i32 = -6001;
}

/// Map TransferError to (StatusCode, error_code, message)
fn map_error(e: &TransferError) -> (StatusCode, i32, String) {
    let status = match e.http_status() {
        400 => StatusCode::BAD_REQUEST,
        404 => StatusCode::NOT_FOUND,
        409 => StatusCode::CONFLICT,
        503 => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    let code = match e.code() {
        "VALIDATION_ERROR" => error_codes::INVALID_PARAMETER,
        "NOT_FOUND" => error_codes::TRANSFER_NOT_FOUND,
        "IDEMPOTENCY_CONFLICT" => error_codes::IDEMPOTENCY_CONFLICT,
        "SERVICE_UNAVAILABLE" => error_codes::SERVICE_UNAVAILABLE,
        "DATABASE_ERROR" => error_codes::DATABASE_ERROR,
        _ => error_codes::INTERNAL_ERROR,
    };

    (status, code, e.to_string())
}

// ============================================================================
// Helper Functions
// ============================================================================

fn context_from(headers: &HeaderMap) -> RequestContext {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.trim().is_empty())
        .map(RequestContext::new)
        .unwrap_or_else(RequestContext::generate)
}

fn header_idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// Build an intent from an API request. The key must come from somewhere:
/// the header for single submissions, the body field for batch items.
fn build_intent(
    req: &TransferApiRequest,
    header_key: Option<String>,
) -> Result<TransferIntent, TransferError> {
    let amount = Decimal::from_str(req.amount.trim())
        .map_err(|_| TransferError::Validation(format!("Invalid amount: {}", req.amount)))?;

    let key = header_key
        .or_else(|| req.idempotency_key.clone())
        .unwrap_or_default();

    Ok(TransferIntent::new(
        req.from_account,
        req.to_account,
        amount,
        key,
    ))
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    if let Some(db) = &state.database
        && let Err(e) = db.health_check().await
    {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "unavailable", "error": e.to_string() })),
        );
    }
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn create_transfer(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<TransferApiRequest>,
) -> (StatusCode, Json<ApiResponse<TransferApiResponse>>) {
    let ctx = context_from(&headers);
    info!(
        correlation_id = %ctx,
        from_account = req.from_account,
        to_account = req.to_account,
        "Transfer request received"
    );

    let intent = match build_intent(&req, header_idempotency_key(&headers)) {
        Ok(intent) => intent,
        Err(e) => {
            let (status, code, msg) = map_error(&e);
            return (status, Json(ApiResponse::error(code, msg)));
        }
    };

    match state.orchestrator.submit(ctx, intent).await {
        Ok(transfer) => (
            StatusCode::OK,
            Json(ApiResponse::success(transfer.into())),
        ),
        Err(e) => {
            let (status, code, msg) = map_error(&e);
            (status, Json(ApiResponse::error(code, msg)))
        }
    }
}

async fn create_transfer_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<BatchApiRequest>,
) -> (StatusCode, Json<ApiResponse<BatchApiResponse>>) {
    let ctx = context_from(&headers);
    info!(
        correlation_id = %ctx,
        batch_size = req.transfers.len(),
        "Batch transfer request received"
    );

    // An unparseable amount is a malformed request, rejected whole before
    // any item is dispatched. Semantic validation stays per-item.
    let mut intents = Vec::with_capacity(req.transfers.len());
    for (index, item) in req.transfers.iter().enumerate() {
        match build_intent(item, None) {
            Ok(intent) => intents.push(intent),
            Err(_) => {
                return (
                    StatusCode::BAD_REQUEST,
                    Json(ApiResponse::error(
                        error_codes::INVALID_PARAMETER,
                        format!("Invalid amount at index {}: {}", index, item.amount),
                    )),
                );
            }
        }
    }

    match state.dispatcher.dispatch(ctx, intents).await {
        Ok(outcomes) => {
            let results = outcomes
                .into_iter()
                .map(|outcome| match outcome {
                    Ok(transfer) => ApiResponse::success(transfer.into()),
                    Err(e) => {
                        let (_, code, msg) = map_error(&e);
                        ApiResponse::error(code, msg)
                    }
                })
                .collect();
            (
                StatusCode::OK,
                Json(ApiResponse::success(BatchApiResponse { results })),
            )
        }
        Err(e) => {
            let (status, code, msg) = map_error(&e);
            (status, Json(ApiResponse::error(code, msg)))
        }
    }
}

async fn get_transfer(
    State(state): State<Arc<AppState>>,
    Path(transfer_id): Path<String>,
) -> (StatusCode, Json<ApiResponse<TransferApiResponse>>) {
    let id = match TransferId::from_str(&transfer_id) {
        Ok(id) => id,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse::error(
                    error_codes::INVALID_PARAMETER,
                    format!("Invalid transfer id: {}", transfer_id),
                )),
            );
        }
    };

    match state.orchestrator.get_by_id(id).await {
        Ok(transfer) => (
            StatusCode::OK,
            Json(ApiResponse::success(transfer.into())),
        ),
        Err(e) => {
            let (status, code, msg) = map_error(&e);
            (status, Json(ApiResponse::error(code, msg)))
        }
    }
}

// ============================================================================
// Unit Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn request(amount: &str, key: Option<&str>) -> TransferApiRequest {
        TransferApiRequest {
            from_account: 1,
            to_account: 2,
            amount: amount.to_string(),
            idempotency_key: key.map(String::from),
        }
    }

    #[test]
    fn test_build_intent_header_key_wins() {
        let req = request("10.00", Some("body-key"));
        let intent = build_intent(&req, Some("header-key".to_string())).unwrap();
        assert_eq!(intent.idempotency_key, "header-key");
        assert_eq!(intent.amount, "10.00".parse().unwrap());
    }

    #[test]
    fn test_build_intent_falls_back_to_body_key() {
        let req = request("10.00", Some("body-key"));
        let intent = build_intent(&req, None).unwrap();
        assert_eq!(intent.idempotency_key, "body-key");
    }

    #[test]
    fn test_build_intent_rejects_malformed_amount() {
        let req = request("ten dollars", Some("k"));
        assert!(matches!(
            build_intent(&req, None),
            Err(TransferError::Validation(_))
        ));
    }

    #[test]
    fn test_map_error_statuses() {
        let (status, code, _) = map_error(&TransferError::Validation("x".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, error_codes::INVALID_PARAMETER);

        let (status, code, _) = map_error(&TransferError::Conflict("x".into()));
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(code, error_codes::IDEMPOTENCY_CONFLICT);

        let (status, code, _) = map_error(&TransferError::NotFound("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(code, error_codes::TRANSFER_NOT_FOUND);

        let (status, _, _) = map_error(&TransferError::ServiceUnavailable("x".into()));
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_api_response_envelope() {
        let ok: ApiResponse<i32> = ApiResponse::success(7);
        assert_eq!(ok.code, 0);
        assert_eq!(ok.data, Some(7));
        assert!(ok.msg.is_none());

        let err: ApiResponse<i32> = ApiResponse::error(error_codes::INVALID_PARAMETER, "bad");
        assert_eq!(err.code, error_codes::INVALID_PARAMETER);
        assert!(err.data.is_none());
        assert_eq!(err.msg.as_deref(), Some("bad"));
    }

    #[tokio::test]
    async fn test_health_check_without_database_is_ok() {
        use crate::idempotency::MemoryIdempotencyStore;
        use crate::ledger::client::MockLedgerClient;
        use crate::ledger::{
            BreakerConfig, BreakerRegistry, NoBackoff, ResilientLedgerClient, RetryPolicy,
            SystemClock,
        };
        use crate::transfer::MemoryTransferStore;

        let registry = BreakerRegistry::new(BreakerConfig::default(), Arc::new(SystemClock));
        let resilient = Arc::new(ResilientLedgerClient::new(
            Arc::new(MockLedgerClient::new()),
            &registry,
            RetryPolicy::new(1, Arc::new(NoBackoff)),
        ));
        let orchestrator = Arc::new(TransferOrchestrator::new(
            Arc::new(MemoryTransferStore::new()),
            Arc::new(MemoryIdempotencyStore::new(24)),
            resilient,
        ));
        let dispatcher = Arc::new(BatchDispatcher::new(orchestrator.clone(), 1, 20));
        let state = Arc::new(AppState {
            orchestrator,
            dispatcher,
            database: None,
        });

        let (status, body) = health_check(State(state)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.0["status"], "ok");
    }

    #[test]
    fn test_transfer_api_response_shape() {
        let intent = TransferIntent::new(1, 2, "10.00".parse().unwrap(), "k1");
        let transfer = Transfer::pending(&intent);
        let response: TransferApiResponse = transfer.into();

        assert_eq!(response.status, "PENDING");
        assert_eq!(response.amount, "10.00");
        assert!(response.completed_at.is_none());
    }
}
