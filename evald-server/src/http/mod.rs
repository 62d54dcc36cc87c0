//! HTTP server module

mod api;
mod evaluation;
mod monitoring;
mod records;
mod registry;

use std::sync::Arc;

use axum::{
    Json, Router,
    routing::{get, post, put},
};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::error::ApiError;

pub use api::HealthResponse;
pub use evaluation::SingleRequest;
pub use records::{PromoteRequest, RankingParams};
pub use registry::{CreateDatasetRequest, DatasetList, ModelList};

/// Success envelope: `{success: true, data}`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data,
        })
    }
}

pub(crate) type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Create the HTTP router with all routes configured
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(api::health))
        // Registry
        .route("/api/models", get(registry::list_models))
        .route("/api/models/scan", post(registry::scan_models))
        .route("/api/models/*path", get(registry::get_model))
        .route(
            "/api/datasets",
            get(registry::list_datasets).post(registry::create_dataset),
        )
        .route("/api/datasets/:name", get(registry::get_dataset))
        .route(
            "/api/datasets/:name/validate",
            post(registry::validate_dataset),
        )
        // Evaluation
        .route("/api/evaluation/single", post(evaluation::submit_single))
        .route("/api/evaluation/batch", post(evaluation::submit_batch))
        .route("/api/evaluation/tasks", get(evaluation::list_tasks))
        .route("/api/evaluation/tasks/:id", get(evaluation::get_task))
        .route("/api/evaluation/tasks/:id/events", get(evaluation::task_events))
        .route("/api/evaluation/tasks/:id/cancel", post(evaluation::cancel_task))
        .route("/api/evaluation/tasks/:id/report", get(evaluation::task_report))
        .route("/api/evaluation/queue", get(evaluation::queue_status))
        // Records
        .route("/api/records", get(records::list_records))
        .route("/api/records/statistics", get(records::statistics))
        .route("/api/records/rankings/:dataset", get(records::rankings))
        .route("/api/records/excellent", get(records::list_excellent))
        .route(
            "/api/records/excellent/summary",
            get(records::excellent_summary),
        )
        .route(
            "/api/records/excellent/categories",
            get(records::excellent_categories),
        )
        .route(
            "/api/records/excellent/:excellent_id",
            put(records::update_excellent),
        )
        .route("/api/records/:id", get(records::get_record))
        .route(
            "/api/records/:id/excellent",
            post(records::promote).delete(records::demote),
        )
        // Monitoring
        .route("/api/monitoring/gpu/status", get(monitoring::gpu_status))
        .route("/api/monitoring/nvidia-smi", get(monitoring::nvidia_smi))
        .route("/api/monitoring/system/info", get(monitoring::system_info))
        .route("/api/monitoring/health", get(monitoring::health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}
