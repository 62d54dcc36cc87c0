//! Evaluation task endpoints
//!
//! Submissions return as soon as the task is queued. Clients follow a task
//! either by polling `GET /api/evaluation/tasks/:id` or by holding the
//! `/events` stream open, which sends one snapshot per committed change and
//! closes after the terminal one.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::sse::{Event, KeepAlive, Sse},
};
use evald_core::{
    BatchReport, BatchRequest, QueueStatus, RunConfig, Task, TaskId, TaskProjection,
};
use futures::{Stream, StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::WatchStream;

use super::{ApiResponse, ApiResult};
use crate::AppState;
use crate::error::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct SingleRequest {
    pub model_path: String,
    pub dataset_name: String,
    #[serde(default)]
    pub config: RunConfig,
}

/// An id that cannot name a task is reported like any unknown task.
fn parse_task_id(raw: &str) -> Result<TaskId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::Core(evald_core::Error::NotFound {
            kind: "task",
            id: raw.to_string(),
        })
    })
}

/// POST /api/evaluation/single
pub async fn submit_single(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SingleRequest>, JsonRejection>,
) -> ApiResult<TaskProjection> {
    let Json(request) = payload?;
    let task = state.orchestrator.submit_single(
        &request.model_path,
        &request.dataset_name,
        request.config,
    )?;
    Ok(ApiResponse::ok(task.projection()))
}

/// POST /api/evaluation/batch
pub async fn submit_batch(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<TaskProjection> {
    let Json(request) = payload?;
    let task = state.orchestrator.submit_batch(request)?;
    Ok(ApiResponse::ok(task.projection()))
}

/// GET /api/evaluation/tasks - Newest first
pub async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<Vec<TaskProjection>> {
    Ok(ApiResponse::ok(state.orchestrator.list_projections()))
}

/// GET /api/evaluation/tasks/:id - Full task with its runs
pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Task> {
    let id = parse_task_id(&id)?;
    Ok(ApiResponse::ok(state.orchestrator.get_task_progress(id)?))
}

/// GET /api/evaluation/tasks/:id/events - Server-sent task snapshots
pub async fn task_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = parse_task_id(&id)?;
    let rx = state.orchestrator.subscribe(id)?;

    let stream = WatchStream::new(rx)
        .scan(false, |finished, task| {
            if *finished {
                return future::ready(None);
            }
            *finished = task.is_terminal();
            future::ready(Some(task))
        })
        .map(|task| {
            Ok(match serde_json::to_string(&task) {
                Ok(json) => Event::default().event("task").data(json),
                Err(e) => Event::default().event("error").data(e.to_string()),
            })
        });

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// POST /api/evaluation/tasks/:id/cancel
pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<TaskProjection> {
    let id = parse_task_id(&id)?;
    Ok(ApiResponse::ok(state.orchestrator.cancel(id)?))
}

/// GET /api/evaluation/tasks/:id/report - Only for finished tasks
pub async fn task_report(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<BatchReport> {
    let id = parse_task_id(&id)?;
    Ok(ApiResponse::ok(state.orchestrator.batch_report(id)?))
}

/// GET /api/evaluation/queue
pub async fn queue_status(State(state): State<Arc<AppState>>) -> ApiResult<QueueStatus> {
    Ok(ApiResponse::ok(state.orchestrator.queue_status()))
}
