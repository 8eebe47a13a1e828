//! REST API server implementation using Axum

use crate::api::{
    AddImagesRequest, AddImagesResponse, JobStatusResponse, OverallStatusResponse, QueryRequest,
    QueryResponse,
};
use crate::auth::require_api_key;
use axum::{
    extract::{Path, State},
    http::{HeaderValue, Method, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use fleetindex_core::config::ServerConfig;
use fleetindex_core::{AuthFailure, Error};
use fleetindex_index::IndexStats;
use fleetindex_orchestrator::{Orchestrator, QueryOrchestrator};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[cfg(feature = "openapi")]
use utoipa::OpenApi;
#[cfg(feature = "openapi")]
use utoipa_swagger_ui::SwaggerUi;

pub const SERVICE_NAME: &str = "Image Indexing API";
pub const API_VERSION: &str = "1.0.0";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub query: Arc<QueryOrchestrator>,
    pub api_keys: Arc<Vec<String>>,
    pub require_auth: bool,
    pub default_top_k: usize,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>, query: Arc<QueryOrchestrator>) -> Self {
        let config = orchestrator.config();
        Self {
            api_keys: Arc::new(config.server.api_keys.clone()),
            require_auth: config.server.require_auth,
            default_top_k: config.query.default_top_k,
            orchestrator,
            query,
        }
    }
}

fn cors_layer(server_config: &ServerConfig) -> CorsLayer {
    if server_config.allowed_origins.is_empty() {
        // CORS disabled
        CorsLayer::new()
    } else if server_config.allowed_origins.iter().any(|o| o == "*") {
        CorsLayer::permissive()
    } else {
        let mut cors = CorsLayer::new()
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([
                axum::http::header::CONTENT_TYPE,
                axum::http::HeaderName::from_static(crate::auth::API_KEY_HEADER),
            ]);

        for origin in &server_config.allowed_origins {
            if let Ok(header_value) = HeaderValue::from_str(origin) {
                cors = cors.allow_origin(header_value);
            }
        }
        cors
    }
}

/// Build the Axum router with all endpoints
pub fn build_router(state: AppState, server_config: &ServerConfig) -> Router {
    let protected = Router::new()
        .route("/api/v1/index/add-images", post(add_images_handler))
        .route("/api/v1/index/status/{job_id}", get(job_status_handler))
        .route("/api/v1/index/status", get(overall_status_handler))
        .route("/api/v1/index/stats", get(index_stats_handler))
        .route("/api/v1/query", post(query_handler))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_api_key,
        ));

    let router = Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .merge(protected);

    #[cfg(feature = "openapi")]
    let router = router
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()));

    router
        .layer(cors_layer(server_config))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// GET /
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/",
    responses((status = 200, description = "Service banner")),
    tag = "health"
))]
async fn root_handler() -> impl IntoResponse {
    Json(json!({
        "service": SERVICE_NAME,
        "status": "running",
        "version": API_VERSION,
    }))
}

/// GET /health
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is healthy")),
    tag = "health"
))]
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": Utc::now().to_rfc3339(),
            "index_available": state.orchestrator.index_available(),
        })),
    )
}

/// POST /api/v1/index/add-images
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/index/add-images",
    request_body = AddImagesRequest,
    responses(
        (status = 200, description = "Images queued or already indexed", body = AddImagesResponse),
        (status = 400, description = "Empty image list"),
        (status = 401, description = "Missing API key"),
        (status = 403, description = "Invalid API key")
    ),
    tag = "index"
))]
async fn add_images_handler(
    State(state): State<AppState>,
    Json(request): Json<AddImagesRequest>,
) -> Result<Json<AddImagesResponse>, ApiError> {
    tracing::info!(
        "Add images request: {} paths, priority={}",
        request.image_paths.len(),
        request.priority.as_deref().unwrap_or("normal")
    );

    let submission = state
        .orchestrator
        .submit(request.image_paths, request.priority)
        .await?;
    Ok(Json(submission.into()))
}

/// GET /api/v1/index/status/{job_id}
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/index/status/{job_id}",
    params(("job_id" = String, Path, description = "Job id returned by add-images")),
    responses(
        (status = 200, description = "Job status", body = JobStatusResponse),
        (status = 404, description = "Unknown job")
    ),
    tag = "index"
))]
async fn job_status_handler(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job = state.orchestrator.job(&job_id).await?;
    Ok(Json(JobStatusResponse::from(&job)))
}

/// GET /api/v1/index/status
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/index/status",
    responses((status = 200, description = "Overall status", body = OverallStatusResponse)),
    tag = "index"
))]
async fn overall_status_handler(
    State(state): State<AppState>,
) -> Result<Json<OverallStatusResponse>, ApiError> {
    let overview = state.orchestrator.overview().await?;
    let stats = state.orchestrator.stats().await?;
    let total = state.orchestrator.total_indexed().await;
    Ok(Json(OverallStatusResponse::new(total, overview, stats)))
}

/// GET /api/v1/index/stats
#[cfg_attr(feature = "openapi", utoipa::path(
    get,
    path = "/api/v1/index/stats",
    responses((status = 200, description = "Index statistics", body = IndexStats)),
    tag = "index"
))]
async fn index_stats_handler(State(state): State<AppState>) -> Result<Json<IndexStats>, ApiError> {
    Ok(Json(state.orchestrator.stats().await?))
}

/// POST /api/v1/query
#[cfg_attr(feature = "openapi", utoipa::path(
    post,
    path = "/api/v1/query",
    request_body = QueryRequest,
    responses(
        (status = 200, description = "Ranked matches", body = QueryResponse),
        (status = 400, description = "Empty text or zero top_k"),
        (status = 404, description = "No merged index yet")
    ),
    tag = "query"
))]
async fn query_handler(
    State(state): State<AppState>,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let top_k = request.top_k.unwrap_or(state.default_top_k);
    tracing::info!("Query request: {:?}, top_k={top_k}", request.text);

    let outcome = state
        .query
        .query(&request.text, top_k, request.copy_results)
        .await?;
    Ok(Json(QueryResponse::new(request.text, outcome)))
}

/// Error handling for API endpoints
#[derive(Debug)]
pub enum ApiError {
    InvalidRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Internal(Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::InvalidRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::Internal(err) => {
                // Log the full error details for debugging
                tracing::error!("Internal server error: {err:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal server error occurred".to_string(),
                )
            }
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::NotFound(msg) => ApiError::NotFound(msg),
            Error::InvalidInput(msg) => ApiError::InvalidRequest(msg),
            Error::Auth(failure @ AuthFailure::Missing) => {
                ApiError::Unauthorized(failure.to_string())
            }
            Error::Auth(failure @ AuthFailure::Invalid) => ApiError::Forbidden(failure.to_string()),
            other => ApiError::Internal(other),
        }
    }
}

/// OpenAPI documentation
#[cfg(feature = "openapi")]
#[derive(OpenApi)]
#[openapi(
    paths(
        root_handler,
        health_handler,
        add_images_handler,
        job_status_handler,
        overall_status_handler,
        index_stats_handler,
        query_handler
    ),
    components(schemas(
        AddImagesRequest,
        AddImagesResponse,
        JobStatusResponse,
        crate::api::ProgressInfo,
        OverallStatusResponse,
        crate::api::ActiveJob,
        crate::api::RecentJob,
        IndexStats,
        QueryRequest,
        QueryResponse,
        crate::api::QueryResultItem
    )),
    tags(
        (name = "index", description = "Job submission and index status"),
        (name = "query", description = "Text search over the merged index"),
        (name = "health", description = "Health check endpoints")
    )
)]
struct ApiDoc;
