//! HTTP front-end.
//!
//! Exposes ingestion, querying, replay and snippet lookup as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/usecases/{use_case}/files` | Ingest the raw request body as one file |
//! | `POST` | `/usecases/{use_case}/recons` | Run a reconciliation query |
//! | `GET`  | `/usecases/{use_case}/recons?limit=` | Latest records, newest first |
//! | `GET`  | `/usecases/{use_case}/recons/{recon_id}` | One stored record |
//! | `POST` | `/snippets` | Resolve a reference to its source data |
//!
//! File upload takes `filename` (required), `kb_id`, `uploader` and `wait`
//! as query parameters.
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `build_failed` (502),
//! `upstream` (502), `timeout` (504), `internal` (500).

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use recon_harness_core::error::ReconError;
use recon_harness_core::models::{ReconRecord, Reference};

use crate::config::Config;
use crate::ingest::{IngestCoordinator, IngestReport, IngestRequest, IngestSettings, WaitOptions};
use crate::recon::{QueryRequest, QueryResult, ReconCoordinator, Snippet};

/// Largest accepted upload.
const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

const DEFAULT_LIST_LIMIT: usize = 10;

#[derive(Clone)]
struct AppState {
    config: Arc<Config>,
    ingest: Arc<IngestCoordinator>,
    recon: Arc<ReconCoordinator>,
}

/// Starts the HTTP server on `[server].bind` and runs until the process
/// is terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let services = crate::backends::connect_services(config).await?;

    let state = AppState {
        config: Arc::new(config.clone()),
        ingest: Arc::new(IngestCoordinator::new(
            services.clone(),
            IngestSettings::from_config(config),
        )),
        recon: Arc::new(ReconCoordinator::from_config(services, config)),
    };

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(%bind_addr, "recon server listening");
    axum::serve(listener, router(state)).await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route(
            "/usecases/{use_case}/files",
            post(handle_ingest).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route(
            "/usecases/{use_case}/recons",
            post(handle_query).get(handle_list_recons),
        )
        .route("/usecases/{use_case}/recons/{recon_id}", get(handle_get_recon))
        .route("/snippets", post(handle_snippet))
        .layer(cors)
        .with_state(state)
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

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
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

impl From<ReconError> for AppError {
    fn from(err: ReconError) -> Self {
        let code = err.code();
        let status = match code {
            "bad_request" => StatusCode::BAD_REQUEST,
            "build_failed" | "upstream" => StatusCode::BAD_GATEWAY,
            "timeout" => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(code, error = %err, "request failed");
        }
        AppError {
            status,
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ POST /usecases/{use_case}/files ============

#[derive(Deserialize)]
struct IngestParams {
    filename: String,
    #[serde(default)]
    kb_id: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    /// Defaults to `[knowledge_base].wait_for_build`.
    #[serde(default)]
    wait: Option<bool>,
}

async fn handle_ingest(
    State(state): State<AppState>,
    Path(use_case): Path<String>,
    Query(params): Query<IngestParams>,
    body: Bytes,
) -> Result<Json<IngestReport>, AppError> {
    if body.is_empty() {
        return Err(bad_request("request body must contain the file"));
    }
    let kb = &state.config.knowledge_base;
    let kb_id = kb
        .resolve_kb_id(params.kb_id)
        .map_err(|e| bad_request(e.to_string()))?;
    let wait = params.wait.unwrap_or(kb.wait_for_build).then(|| WaitOptions {
        poll_interval: kb.poll_interval(),
        timeout: kb.timeout(),
    });

    let request = IngestRequest {
        use_case,
        kb_id,
        filename: params.filename,
        uploader: params.uploader.unwrap_or_else(|| "api".to_string()),
        wait,
    };
    let report = state.ingest.ingest_bytes(&request, &body).await?;
    Ok(Json(report))
}

// ============ POST /usecases/{use_case}/recons ============

#[derive(Deserialize)]
struct QueryBody {
    query: String,
    #[serde(default)]
    kb_id: Option<String>,
    #[serde(default)]
    batch_id: Option<String>,
    #[serde(default)]
    global_template: Option<String>,
    #[serde(default)]
    usecase_template: Option<String>,
}

async fn handle_query(
    State(state): State<AppState>,
    Path(use_case): Path<String>,
    Json(body): Json<QueryBody>,
) -> Result<Json<QueryResult>, AppError> {
    let kb_id = state
        .config
        .knowledge_base
        .resolve_kb_id(body.kb_id)
        .map_err(|e| bad_request(e.to_string()))?;

    let result = state
        .recon
        .query(&QueryRequest {
            use_case,
            kb_id,
            user_query: body.query,
            batch_id: body.batch_id,
            global_template: body.global_template,
            usecase_template: body.usecase_template,
        })
        .await?;
    Ok(Json(result))
}

// ============ GET /usecases/{use_case}/recons ============

#[derive(Deserialize)]
struct ListParams {
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct ListResponse {
    recons: Vec<ReconRecord>,
}

async fn handle_list_recons(
    State(state): State<AppState>,
    Path(use_case): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Json<ListResponse>, AppError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    if limit == 0 {
        return Err(bad_request("limit must be > 0"));
    }
    let recons = state.recon.list_recons(&use_case, limit).await?;
    Ok(Json(ListResponse { recons }))
}

// ============ GET /usecases/{use_case}/recons/{recon_id} ============

async fn handle_get_recon(
    State(state): State<AppState>,
    Path((use_case, recon_id)): Path<(String, String)>,
) -> Result<Json<ReconRecord>, AppError> {
    match state.recon.get_recon(&use_case, &recon_id).await? {
        Some(record) => Ok(Json(record)),
        None => Err(not_found(format!("recon not found: {}", recon_id))),
    }
}

// ============ POST /snippets ============

async fn handle_snippet(
    State(state): State<AppState>,
    Json(reference): Json<Reference>,
) -> Json<Snippet> {
    Json(state.recon.fetch_snippet(&reference).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recon_errors_map_to_status_codes() {
        let e = AppError::from(ReconError::InvalidInput("x".into()));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);

        let e = AppError::from(ReconError::BuildFailed {
            status: "FAILED".into(),
            payload: serde_json::json!({"status": "FAILED"}),
        });
        assert_eq!(e.status, StatusCode::BAD_GATEWAY);
        assert_eq!(e.code, "build_failed");

        let e = AppError::from(ReconError::Timeout {
            operation: "knowledge base build",
            elapsed: std::time::Duration::from_secs(601),
            attempts: 41,
        });
        assert_eq!(e.status, StatusCode::GATEWAY_TIMEOUT);

        let e = AppError::from(ReconError::Service(anyhow::anyhow!("S3 down")));
        assert_eq!(e.code, "upstream");
        assert_eq!(e.message, "S3 down");
    }
}
