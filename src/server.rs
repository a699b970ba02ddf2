//! HTTP API server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/` | Banner |
//! | `GET` | `/api/health` | Counts and configured providers |
//! | `GET` | `/api/repos` | List repository records |
//! | `GET` | `/api/repos/{id}` | One repository record |
//! | `POST` | `/api/ingest` | Start ingesting `{ "repo_url": ... }` |
//! | `DELETE` | `/api/repos/{id}` | Delete a repository and its vectors |
//! | `POST` | `/api/repos/{id}/resync` | Re-ingest a finished repository |
//! | `DELETE` | `/api/repos` | Delete everything |
//! | `POST` | `/api/chat` | Ask `{ "question", "repo_id" }` |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_ready", "message": "Repository repo_... is not ready (status: Indexing)" } }
//! ```
//!
//! Error codes: `bad_request`, `quota_exceeded`, `duplicate_job`,
//! `not_ready` (400), `not_found` (404), `internal` (500).

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use codebase_qa_core::models::RepositoryRecord;

use crate::config::Config;
use crate::error::ServiceError;
use crate::orchestrator::FinalOutput;
use crate::service::{HealthReport, IngestAccepted, RepoService};

#[derive(Clone)]
struct AppState {
    service: Arc<RepoService>,
}

/// Build the service from `config` and serve until Ctrl-C.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let service = Arc::new(RepoService::from_config(config)?);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    println!("Codebase Q&A API listening on http://{}", listener.local_addr()?);

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

/// Serve `service` on an already-bound listener. Used by tests.
pub async fn serve_with_listener(
    listener: tokio::net::TcpListener,
    service: Arc<RepoService>,
) -> anyhow::Result<()> {
    axum::serve(listener, router(service)).await?;
    Ok(())
}

pub fn router(service: Arc<RepoService>) -> Router {
    let cors = cors_layer(&service.config().server.allowed_origins);
    Router::new()
        .route("/", get(handle_root))
        .route("/api/health", get(handle_health))
        .route("/api/repos", get(handle_list).delete(handle_clear))
        .route("/api/repos/{id}", get(handle_get).delete(handle_delete))
        .route("/api/repos/{id}/resync", post(handle_resync))
        .route("/api/ingest", post(handle_ingest))
        .route("/api/chat", post(handle_chat))
        .layer(cors)
        .with_state(AppState { service })
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let values: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(values))
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("shutting down");
    }
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
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
        code: "bad_request",
        message: message.into(),
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        let (status, code) = match &err {
            ServiceError::QuotaExceeded { .. } => (StatusCode::BAD_REQUEST, "quota_exceeded"),
            ServiceError::DuplicateJob(_) => (StatusCode::BAD_REQUEST, "duplicate_job"),
            ServiceError::NotReady { .. } => (StatusCode::BAD_REQUEST, "not_ready"),
            ServiceError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ServiceError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ServiceError::Internal(e) => {
                tracing::error!(error = %format!("{:#}", e), "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal")
            }
        };
        AppError {
            status,
            code,
            message: err.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

// ============ Handlers ============

#[derive(Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "Codebase Q&A API is running",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(state.service.health())
}

async fn handle_list(State(state): State<AppState>) -> Json<Vec<RepositoryRecord>> {
    Json(state.service.list())
}

async fn handle_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<RepositoryRecord>, AppError> {
    Ok(Json(state.service.get(&id)?))
}

#[derive(Deserialize)]
struct IngestRequest {
    repo_url: String,
}

async fn handle_ingest(
    State(state): State<AppState>,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let Json(req) = payload?;
    let accepted = state.service.create_ingestion(&req.repo_url)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

async fn handle_resync(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<IngestAccepted>), AppError> {
    let accepted = state.service.resync(&id)?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

#[derive(Serialize)]
struct DeleteResponse {
    status: &'static str,
    repo_id: String,
}

async fn handle_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResponse>, AppError> {
    let record = state.service.delete(&id).await?;
    Ok(Json(DeleteResponse {
        status: "deleted",
        repo_id: record.id,
    }))
}

#[derive(Serialize)]
struct ClearResponse {
    status: &'static str,
    namespaces: Vec<String>,
}

async fn handle_clear(State(state): State<AppState>) -> Result<Json<ClearResponse>, AppError> {
    let namespaces = state.service.clear_all().await?;
    Ok(Json(ClearResponse {
        status: "cleared",
        namespaces,
    }))
}

#[derive(Deserialize)]
struct ChatRequest {
    #[serde(alias = "message")]
    question: String,
    repo_id: String,
}

async fn handle_chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<FinalOutput>, AppError> {
    let Json(req) = payload?;
    Ok(Json(state.service.query(&req.repo_id, &req.question).await?))
}
