//! Resource monitoring endpoints
//!
//! An unavailable GPU or host probe is a normal answer here, not an error:
//! the status payload says `unavailable` with the reason. Only the raw
//! `nvidia-smi` passthrough fails with 503 when the driver cannot answer.

use std::sync::Arc;

use axum::extract::State;
use evald_monitor::{GpuStatus, HealthStatus, HostStatus, NvidiaSmiReport};

use super::{ApiResponse, ApiResult};
use crate::AppState;
use crate::error::ApiError;

/// GET /api/monitoring/gpu/status
pub async fn gpu_status(State(state): State<Arc<AppState>>) -> ApiResult<GpuStatus> {
    Ok(ApiResponse::ok(state.monitor.sample().await.gpu))
}

/// GET /api/monitoring/nvidia-smi
pub async fn nvidia_smi(State(state): State<Arc<AppState>>) -> ApiResult<NvidiaSmiReport> {
    let report = state
        .monitor
        .nvidia_smi()
        .await
        .map_err(|e| ApiError::Unavailable(e.to_string()))?;
    Ok(ApiResponse::ok(report))
}

/// GET /api/monitoring/system/info
pub async fn system_info(State(state): State<Arc<AppState>>) -> ApiResult<HostStatus> {
    Ok(ApiResponse::ok(state.monitor.sample().await.host))
}

/// GET /api/monitoring/health
pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<HealthStatus> {
    Ok(ApiResponse::ok(state.monitor.sample().await.health))
}
