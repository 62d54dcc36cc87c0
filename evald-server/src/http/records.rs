//! Evaluation record endpoints

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, QueryRejection},
    },
};
use evald_core::{
    CategoryCount, ExcellentEntry, ExcellentId, ExcellentQuery, ExcellentRecord, ExcellentSummary,
    ExcellentUpdate, Ranking, Record, RecordId, RecordPage, RecordQuery, RecordStatistics,
};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, ApiResult};
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_RANKING_LIMIT: usize = 10;
const MAX_RANKING_LIMIT: usize = 100;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct RankingParams {
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PromoteRequest {
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
}

/// GET /api/records - Filtered, sorted, paged
pub async fn list_records(
    State(state): State<Arc<AppState>>,
    query: Result<Query<RecordQuery>, QueryRejection>,
) -> ApiResult<RecordPage> {
    let Query(query) = query?;
    Ok(ApiResponse::ok(state.store().list(&query).await?))
}

/// GET /api/records/statistics
pub async fn statistics(State(state): State<Arc<AppState>>) -> ApiResult<RecordStatistics> {
    Ok(ApiResponse::ok(state.store().statistics().await?))
}

/// GET /api/records/rankings/:dataset - Best completed score per model
pub async fn rankings(
    State(state): State<Arc<AppState>>,
    Path(dataset): Path<String>,
    params: Result<Query<RankingParams>, QueryRejection>,
) -> ApiResult<Vec<Ranking>> {
    let Query(params) = params?;
    let limit = params
        .limit
        .unwrap_or(DEFAULT_RANKING_LIMIT)
        .clamp(1, MAX_RANKING_LIMIT);
    Ok(ApiResponse::ok(state.store().rankings(&dataset, limit).await?))
}

/// GET /api/records/excellent
pub async fn list_excellent(
    State(state): State<Arc<AppState>>,
    query: Result<Query<ExcellentQuery>, QueryRejection>,
) -> ApiResult<Vec<ExcellentEntry>> {
    let Query(query) = query?;
    Ok(ApiResponse::ok(state.store().list_excellent(&query).await?))
}

/// GET /api/records/:id
pub async fn get_record(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Record> {
    let id = parse_record_id(&id)?;
    let record = state
        .store()
        .get(id)
        .await?
        .ok_or_else(|| evald_core::Error::NotFound {
            kind: "record",
            id: id.to_string(),
        })?;
    Ok(ApiResponse::ok(record))
}

/// GET /api/records/excellent/summary
pub async fn excellent_summary(State(state): State<Arc<AppState>>) -> ApiResult<ExcellentSummary> {
    Ok(ApiResponse::ok(state.store().excellent_summary().await?))
}

/// GET /api/records/excellent/categories
pub async fn excellent_categories(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Vec<CategoryCount>> {
    Ok(ApiResponse::ok(state.store().excellent_categories().await?))
}

/// PUT /api/records/excellent/:excellent_id - Edit a marker's reason or category
pub async fn update_excellent(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    payload: Result<Json<ExcellentUpdate>, JsonRejection>,
) -> ApiResult<ExcellentRecord> {
    let id = id
        .parse::<u64>()
        .map(ExcellentId)
        .map_err(|_| ApiError::BadRequest(format!("invalid excellent record id: {id}")))?;
    let Json(update) = payload?;
    let excellent = state.store().update_excellent(id, update).await?;
    tracing::info!(excellent_id = %id, category = %excellent.category, "excellent record updated");
    Ok(ApiResponse::ok(excellent))
}

/// POST /api/records/:id/excellent - Mark a completed record as excellent
///
/// The body is optional; missing fields fall back to the store defaults. A
/// body that is present must be a valid JSON object.
pub async fn promote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<ExcellentRecord> {
    let id = parse_record_id(&id)?;
    let request = parse_promote_body(&body)?;
    let excellent = state
        .store()
        .promote(id, request.reason, request.category)
        .await?;
    tracing::info!(record_id = %id, category = %excellent.category, "record promoted");
    Ok(ApiResponse::ok(excellent))
}

/// DELETE /api/records/:id/excellent - Remove every excellent marker of a record
pub async fn demote(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Vec<ExcellentRecord>> {
    let id = parse_record_id(&id)?;
    let removed = state.store().demote(id).await?;
    tracing::info!(record_id = %id, removed = removed.len(), "record demoted");
    Ok(ApiResponse::ok(removed))
}

fn parse_promote_body(body: &[u8]) -> Result<PromoteRequest, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(PromoteRequest::default());
    }
    serde_json::from_slice(body)
        .map_err(|e| ApiError::BadRequest(format!("invalid promote body: {e}")))
}

fn parse_record_id(raw: &str) -> Result<RecordId, ApiError> {
    raw.parse::<u64>()
        .map(RecordId)
        .map_err(|_| ApiError::BadRequest(format!("invalid record id: {raw}")))
}
