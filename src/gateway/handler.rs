//! HTTP tool handlers

use crate::error::Error;
use crate::knowledge::{KnowledgeBase, RememberRequest};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Build the tool router.
///
/// | Route | Operation |
/// |---|---|
/// | `GET /health` | liveness probe |
/// | `POST /tools/remember` | [`KnowledgeBase::remember`] |
/// | `POST /tools/consolidate` | [`KnowledgeBase::consolidate`] |
/// | `POST /tools/blindspot_report` | [`KnowledgeBase::blindspot_report`] |
/// | `POST /tools/export_knowledge_base` | [`KnowledgeBase::export`] |
/// | `POST /tools/import_knowledge_base` | [`KnowledgeBase::import`] |
/// | `POST /tools/sync_domains` | [`KnowledgeBase::sync_domains`] |
pub fn tools_router(kb: Arc<KnowledgeBase>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/tools/remember", post(remember))
        .route("/tools/consolidate", post(consolidate))
        .route("/tools/blindspot_report", post(blindspot_report))
        .route("/tools/export_knowledge_base", post(export_knowledge_base))
        .route("/tools/import_knowledge_base", post(import_knowledge_base))
        .route("/tools/sync_domains", post(sync_domains))
        .layer(build_cors(cors_origins))
        .layer(TraceLayer::new_for_http())
        .with_state(kb)
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}

/// Error body: `{"error": {"code", "message"}}`
#[derive(Debug)]
pub struct ApiError(Error);

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let code = match status {
            StatusCode::BAD_REQUEST | StatusCode::BAD_GATEWAY => self.0.code(),
            _ => "INTERNAL_ERROR",
        };
        let body = ErrorBody {
            error: ErrorDetail {
                code,
                message: self.0.public_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn remember(
    State(kb): State<Arc<KnowledgeBase>>,
    payload: std::result::Result<Json<RememberRequest>, JsonRejection>,
) -> ApiResult<crate::knowledge::RememberReport> {
    let Json(request) = payload?;
    Ok(Json(kb.remember(request).await?))
}

async fn consolidate(
    State(kb): State<Arc<KnowledgeBase>>,
) -> ApiResult<crate::pipeline::ConsolidationReport> {
    Ok(Json(kb.consolidate().await?))
}

async fn blindspot_report(State(kb): State<Arc<KnowledgeBase>>) -> impl IntoResponse {
    Json(kb.blindspot_report().await)
}

async fn export_knowledge_base(State(kb): State<Arc<KnowledgeBase>>) -> impl IntoResponse {
    Json(kb.export().await)
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    ndjson: String,
}

async fn import_knowledge_base(
    State(kb): State<Arc<KnowledgeBase>>,
    payload: std::result::Result<Json<ImportRequest>, JsonRejection>,
) -> ApiResult<crate::pipeline::ImportReport> {
    let Json(request) = payload?;
    Ok(Json(kb.import(&request.ndjson).await?))
}

async fn sync_domains(
    State(kb): State<Arc<KnowledgeBase>>,
) -> ApiResult<crate::pipeline::SyncReport> {
    Ok(Json(kb.sync_domains().await?))
}
