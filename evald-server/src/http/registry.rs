//! Model and dataset catalog endpoints

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use evald_models::{Dataset, Model, ScanReport};
use serde::{Deserialize, Serialize};

use super::{ApiResponse, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelList {
    pub models: Vec<Model>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DatasetList {
    pub datasets: Vec<Dataset>,
    pub total: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateDatasetRequest {
    pub name: String,
    pub task: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// GET /api/models
pub async fn list_models(State(state): State<Arc<AppState>>) -> ApiResult<ModelList> {
    let models = state.registry().models.list().to_vec();
    Ok(ApiResponse::ok(ModelList {
        total: models.len(),
        models,
    }))
}

/// GET /api/models/*path - One model by path or name
///
/// Model paths are absolute, so `/api/models/models/llama-7b` and
/// `/api/models/%2Fmodels%2Fllama-7b` both find `/models/llama-7b`.
pub async fn get_model(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
) -> ApiResult<Model> {
    let models = &state.registry().models;
    let model = match models.get(&path) {
        Ok(model) => model,
        Err(_) if !path.starts_with('/') => models.get(&format!("/{path}"))?,
        Err(e) => return Err(e.into()),
    };
    Ok(ApiResponse::ok(model))
}

/// POST /api/models/scan - Rescan the models and datasets directories
pub async fn scan_models(State(state): State<Arc<AppState>>) -> ApiResult<ScanReport> {
    let report = state.registry().scan_all().await?;
    Ok(ApiResponse::ok(report))
}

/// GET /api/datasets
pub async fn list_datasets(State(state): State<Arc<AppState>>) -> ApiResult<DatasetList> {
    let datasets = state.registry().datasets.list();
    Ok(ApiResponse::ok(DatasetList {
        total: datasets.len(),
        datasets,
    }))
}

/// GET /api/datasets/:name
pub async fn get_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Dataset> {
    Ok(ApiResponse::ok(state.registry().datasets.get(&name)?))
}

/// POST /api/datasets - Create an empty local dataset
pub async fn create_dataset(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CreateDatasetRequest>, JsonRejection>,
) -> ApiResult<Dataset> {
    let Json(request) = payload?;
    let dataset = state
        .registry()
        .datasets
        .create(&request.name, &request.task, request.description)
        .await?;
    Ok(ApiResponse::ok(dataset))
}

/// POST /api/datasets/:name/validate
pub async fn validate_dataset(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Dataset> {
    Ok(ApiResponse::ok(state.registry().datasets.validate(&name).await?))
}
