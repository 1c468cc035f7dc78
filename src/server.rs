//! HTTP retrieval API.
//!
//! Exposes vaulted data to downstream consumers (visualization layers,
//! debugging tools) that hold a handle and its token.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/data-vault/{handle_id}` | Fetch the full dataset behind a handle |
//! | `GET` | `/health` | Health check (returns version) |
//!
//! # Authentication
//!
//! Every data request carries two headers: `x-user-did` (the principal
//! that owns the handle) and `x-data-token` (the fetch token minted with
//! it). A missing or empty header is a `401`. Wrong credentials are a
//! `404`, identical to an unknown or expired handle — the API never
//! reveals whether a handle exists under someone else's ownership.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "..." } }
//! ```
//!
//! Error codes: `unauthorized` (401), `not_found` (404), `bad_request`
//! (400), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so browser-based
//! visualization clients can fetch vaulted datasets directly.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::error::{principal_tail, Result, VaultError};
use crate::models::MetadataEnvelope;
use crate::store::VaultStore;

/// Shared application state passed to route handlers.
#[derive(Clone)]
struct AppState {
    store: Arc<VaultStore>,
}

/// Starts the retrieval API on `bind` and serves until the process is
/// terminated.
pub async fn run_server(bind: &str, store: Arc<VaultStore>) -> Result<()> {
    let state = AppState { store };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/data-vault/{handle_id}", get(handle_fetch))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state);

    info!(bind, "data vault retrieval API listening");

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| VaultError::BackendError(format!("failed to bind {bind}: {e}")))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| VaultError::BackendError(format!("server error: {e}")))?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an HTTP response.
struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn unauthorized(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::UNAUTHORIZED,
        code: "unauthorized".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<VaultError> for AppError {
    fn from(e: VaultError) -> Self {
        match &e {
            VaultError::DataNotFound { .. } => not_found(e.to_string()),
            VaultError::ValidationError(_) => bad_request(e.to_string()),
            _ => internal_error(e.to_string()),
        }
    }
}

// ============ GET /data-vault/{handle_id} ============

/// JSON success body for a data fetch.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FetchResponse {
    success: bool,
    handle_id: String,
    row_count: usize,
    data: Vec<Value>,
    metadata: MetadataEnvelope,
}

/// Read a required auth header; empty values count as missing.
fn require_header(headers: &HeaderMap, name: &str) -> std::result::Result<String, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| unauthorized(format!("missing required header: {name}")))
}

/// Handler for `GET /data-vault/{handle_id}`.
async fn handle_fetch(
    State(state): State<AppState>,
    Path(handle_id): Path<String>,
    headers: HeaderMap,
) -> std::result::Result<Json<FetchResponse>, AppError> {
    let principal = require_header(&headers, "x-user-did")?;
    let token = require_header(&headers, "x-data-token")?;

    let found = state
        .store
        .get_with_metadata(&handle_id, &principal, &token)
        .await
        .map_err(AppError::from)?;

    let Some((data, metadata)) = found else {
        return Err(not_found(VaultError::not_found(&handle_id).to_string()));
    };

    info!(
        handle = %handle_id,
        principal = %principal_tail(&principal),
        rows = data.len(),
        "served vault data"
    );

    Ok(Json(FetchResponse {
        success: true,
        handle_id,
        row_count: data.len(),
        data,
        metadata,
    }))
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Health check for load balancers and monitoring.
async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}
