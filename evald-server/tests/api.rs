//! End-to-end tests of the REST surface over an in-memory orchestrator

mod common;

use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use evald_core::{
    BatchReport, CategoryCount, ExcellentEntry, ExcellentRecord, ExcellentSummary, QueueStatus,
    Ranking, Record, RecordPage, RecordStatistics, SimulatedHarness, Status, Task,
    TaskProjection,
};
use evald_models::{Dataset, Model};
use evald_monitor::{GpuStatus, HealthStatus, HostStatus, NvidiaSmiReport, StaticMonitor};
use evald_server::http::{DatasetList, HealthResponse, ModelList};
use evald_server::{ApiResponse, ErrorResponse};
use serde_json::json;

async fn submit_batch(app: &common::TestApp, body: serde_json::Value) -> TaskProjection {
    let response = app.server.post("/api/evaluation/batch").json(&body).await;
    response.assert_status_ok();
    let body: ApiResponse<TaskProjection> = response.json();
    assert!(body.success);
    body.data
}

#[tokio::test]
async fn health_reports_task_counts() {
    let app = common::app().await;

    let response = app.server.get("/api/health").await;
    response.assert_status_ok();
    let body: HealthResponse = response.json();
    assert_eq!(body.status, "ok");
    assert_eq!(body.tasks.total(), 0);
}

#[tokio::test]
async fn models_and_datasets_are_listed() {
    let app = common::app().await;

    let models: ApiResponse<ModelList> = app.server.get("/api/models").await.json();
    assert_eq!(models.data.total, 3);

    let datasets: ApiResponse<DatasetList> = app.server.get("/api/datasets").await.json();
    assert!(datasets.data.datasets.iter().any(|d| d.name == "wikitext"));
    assert_eq!(datasets.data.total, datasets.data.datasets.len());

    let response = app.server.get("/api/datasets/wikitext").await;
    response.assert_status_ok();

    let response = app.server.get("/api/datasets/nope").await;
    response.assert_status_not_found();
    let body: ErrorResponse = response.json();
    assert!(!body.success);
    assert_eq!(body.detail, "dataset not found: nope");
}

#[tokio::test]
async fn models_are_looked_up_by_path_or_name() {
    let app = common::app().await;

    let by_path: ApiResponse<Model> = app.server.get("/api/models/models/llama-7b").await.json();
    assert_eq!(by_path.data.path, "/models/llama-7b");

    let by_name: ApiResponse<Model> = app.server.get("/api/models/bge-base").await.json();
    assert_eq!(by_name.data.path, "/models/bge-base");

    let response = app.server.get("/api/models/models/gpt-j").await;
    response.assert_status_not_found();
    let body: ErrorResponse = response.json();
    assert_eq!(body.detail, "model not found: /models/gpt-j");
}

#[tokio::test]
async fn datasets_can_be_created_once() {
    let app = common::app().await;
    let body = json!({"name": "reviews", "task": "classification", "description": "product reviews"});

    let response = app.server.post("/api/datasets").json(&body).await;
    response.assert_status_ok();
    let created: ApiResponse<Dataset> = response.json();
    assert_eq!(created.data.name, "reviews");
    assert!(!created.data.builtin);

    let response = app.server.post("/api/datasets").json(&body).await;
    response.assert_status(StatusCode::CONFLICT);

    let response = app
        .server
        .post("/api/datasets")
        .json(&json!({"name": "../escape", "task": "qa"}))
        .await;
    response.assert_status_bad_request();

    let response = app
        .server
        .post("/api/datasets")
        .json(&json!({"task": "qa"}))
        .await;
    response.assert_status_bad_request();
    let body: ErrorResponse = response.json();
    assert!(!body.success);
}

#[tokio::test]
async fn batch_runs_to_completion_and_is_recorded() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({
            "model_paths": ["/models/llama-7b", "/models/mistral-7b", "/models/bge-base"],
            "dataset_name": "wikitext",
            "task_name": "nightly",
            "parallel": true
        }),
    )
    .await;
    assert_eq!(projection.task_name, "nightly");
    assert_eq!(projection.model_count, 3);

    let task = common::wait_for_task(&app.server, &projection.id.to_string()).await;
    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.progress, 100.0);
    assert!(task.runs.iter().all(|r| r.record_id.is_some()));

    let page: ApiResponse<RecordPage> = app.server.get("/api/records").await.json();
    assert_eq!(page.data.total, 3);
    assert_eq!(page.data.page, 1);

    let stats: ApiResponse<RecordStatistics> =
        app.server.get("/api/records/statistics").await.json();
    assert_eq!(stats.data.total_records, 3);
    assert_eq!(stats.data.successful_records, 3);

    let rankings: ApiResponse<Vec<Ranking>> = app
        .server
        .get("/api/records/rankings/wikitext")
        .add_query_param("limit", 2)
        .await
        .json();
    assert_eq!(rankings.data.len(), 2);
    assert_eq!(rankings.data[0].rank, 1);
    assert!(rankings.data[0].score >= rankings.data[1].score);

    let report = app
        .server
        .get(&format!("/api/evaluation/tasks/{}/report", projection.id))
        .await;
    report.assert_status_ok();
    let report: ApiResponse<BatchReport> = report.json();
    assert_eq!(report.data.summary.successful, 3);
    assert_eq!(report.data.rankings.len(), 3);
}

#[tokio::test]
async fn invalid_batches_are_rejected() {
    let app = common::app().await;

    let response = app
        .server
        .post("/api/evaluation/batch")
        .json(&json!({"model_paths": [], "dataset_name": "wikitext"}))
        .await;
    response.assert_status_bad_request();

    let response = app
        .server
        .post("/api/evaluation/batch")
        .json(&json!({"model_paths": ["/models/ghost"], "dataset_name": "wikitext"}))
        .await;
    response.assert_status_not_found();
    let body: ErrorResponse = response.json();
    assert_eq!(body.detail, "model not found: /models/ghost");

    let response = app
        .server
        .post("/api/evaluation/batch")
        .json(&json!({"model_paths": ["/models/llama-7b"], "dataset_name": "ghost"}))
        .await;
    response.assert_status_not_found();

    let tasks: ApiResponse<Vec<TaskProjection>> =
        app.server.get("/api/evaluation/tasks").await.json();
    assert!(tasks.data.is_empty());
}

#[tokio::test]
async fn failed_runs_are_recorded_but_not_promotable() {
    let app = common::app().await;

    let response = app
        .server
        .post("/api/evaluation/single")
        .json(&json!({
            "model_path": "llama-7b",
            "dataset_name": "wikitext",
            "config": {"fail": true}
        }))
        .await;
    response.assert_status_ok();
    let projection: ApiResponse<TaskProjection> = response.json();

    let task = common::wait_for_task(&app.server, &projection.data.id.to_string()).await;
    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.runs[0].status, Status::Failed);
    let record_id = task.runs[0].record_id.unwrap();

    let record: ApiResponse<Record> = app
        .server
        .get(&format!("/api/records/{record_id}"))
        .await
        .json();
    assert_eq!(record.data.status, Status::Failed);
    assert!(record.data.error_message.unwrap().contains("simulated failure"));

    let response = app
        .server
        .post(&format!("/api/records/{record_id}/excellent"))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let failed: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("status", "failed")
        .await
        .json();
    assert_eq!(failed.data.total, 1);
}

#[tokio::test]
async fn completed_records_can_be_promoted() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b"], "dataset_name": "wikitext"}),
    )
    .await;
    let task = common::wait_for_task(&app.server, &projection.id.to_string()).await;
    let record_id = task.runs[0].record_id.unwrap();

    let response = app
        .server
        .post(&format!("/api/records/{record_id}/excellent"))
        .json(&json!({"reason": "new best", "category": "baseline"}))
        .await;
    response.assert_status_ok();
    let excellent: ApiResponse<ExcellentRecord> = response.json();
    assert_eq!(excellent.data.record_id, record_id);
    assert_eq!(excellent.data.category, "baseline");

    let listed: ApiResponse<Vec<ExcellentEntry>> = app
        .server
        .get("/api/records/excellent")
        .add_query_param("category", "baseline")
        .await
        .json();
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].record.id, record_id);

    let response = app.server.post("/api/records/999/excellent").await;
    response.assert_status_not_found();
}

#[tokio::test]
async fn promotion_body_is_optional_but_must_be_valid() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b"], "dataset_name": "wikitext"}),
    )
    .await;
    let task = common::wait_for_task(&app.server, &projection.id.to_string()).await;
    let record_id = task.runs[0].record_id.unwrap();
    let url = format!("/api/records/{record_id}/excellent");

    let response = app.server.post(&url).text("{\"reason\": ").await;
    response.assert_status_bad_request();
    let body: ErrorResponse = response.json();
    assert!(body.detail.starts_with("invalid promote body"), "{}", body.detail);

    let response = app.server.post(&url).json(&json!({"category": 7})).await;
    response.assert_status_bad_request();

    // Nothing was stored by the rejected requests.
    let listed: ApiResponse<Vec<ExcellentEntry>> =
        app.server.get("/api/records/excellent").await.json();
    assert!(listed.data.is_empty());

    let response = app.server.post(&url).await;
    response.assert_status_ok();
    let excellent: ApiResponse<ExcellentRecord> = response.json();
    assert_eq!(excellent.data.category, "general");
    assert_eq!(excellent.data.reason, "selected by operator");
}

#[tokio::test]
async fn excellent_records_are_curated() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b", "bge-base"], "dataset_name": "wikitext"}),
    )
    .await;
    let task = common::wait_for_task(&app.server, &projection.id.to_string()).await;
    let llama = task.runs[0].record_id.unwrap();
    let bge = task.runs[1].record_id.unwrap();

    let first: ApiResponse<ExcellentRecord> = app
        .server
        .post(&format!("/api/records/{llama}/excellent"))
        .json(&json!({"category": "sota"}))
        .await
        .json();
    app.server
        .post(&format!("/api/records/{bge}/excellent"))
        .await
        .assert_status_ok();

    let summary: ApiResponse<ExcellentSummary> =
        app.server.get("/api/records/excellent/summary").await.json();
    assert_eq!(summary.data.total_excellent, 2);
    assert_eq!(summary.data.model_type_distribution["embedding"], 1);
    assert_eq!(summary.data.recent_additions[0].record.id, bge);

    let response = app
        .server
        .put(&format!("/api/records/excellent/{}", first.data.id.0))
        .json(&json!({"reason": "beats the baseline", "category": "general"}))
        .await;
    response.assert_status_ok();
    let updated: ApiResponse<ExcellentRecord> = response.json();
    assert_eq!(updated.data.reason, "beats the baseline");

    let categories: ApiResponse<Vec<CategoryCount>> =
        app.server.get("/api/records/excellent/categories").await.json();
    assert_eq!(categories.data.len(), 1);
    assert_eq!(categories.data[0].category, "general");
    assert_eq!(categories.data[0].count, 2);

    app.server
        .put("/api/records/excellent/999")
        .json(&json!({"reason": "x"}))
        .await
        .assert_status_not_found();

    let response = app
        .server
        .delete(&format!("/api/records/{llama}/excellent"))
        .await;
    response.assert_status_ok();
    let removed: ApiResponse<Vec<ExcellentRecord>> = response.json();
    assert_eq!(removed.data.len(), 1);
    assert_eq!(removed.data[0].id, first.data.id);

    let response = app
        .server
        .delete(&format!("/api/records/{llama}/excellent"))
        .await;
    response.assert_status_not_found();
    let body: ErrorResponse = response.json();
    assert_eq!(body.detail, format!("excellent record not found: record {llama}"));

    let listed: ApiResponse<Vec<ExcellentEntry>> =
        app.server.get("/api/records/excellent").await.json();
    assert_eq!(listed.data.len(), 1);
    assert_eq!(listed.data[0].record.id, bge);
}

#[tokio::test]
async fn record_queries_filter_and_validate() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b", "bge-base"], "dataset_name": "wikitext"}),
    )
    .await;
    common::wait_for_task(&app.server, &projection.id.to_string()).await;

    let page: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("model_name", "LLAMA")
        .await
        .json();
    assert_eq!(page.data.total, 1);
    assert_eq!(page.data.items[0].model_name, "llama-7b");

    let page: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("model_type", "embedding")
        .await
        .json();
    assert_eq!(page.data.total, 1);

    let page: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("limit", 1)
        .add_query_param("page", 2)
        .await
        .json();
    assert_eq!(page.data.items.len(), 1);
    assert_eq!(page.data.total, 2);

    let page: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("task_id", projection.id.to_string())
        .await
        .json();
    assert_eq!(page.data.total, 2);
    let page: ApiResponse<RecordPage> = app
        .server
        .get("/api/records")
        .add_query_param("task_id", "01890a5d-ac96-774b-bcce-b302099a8057")
        .await
        .json();
    assert_eq!(page.data.total, 0);

    let response = app
        .server
        .get("/api/records")
        .add_query_param("limit", "lots")
        .await;
    response.assert_status_bad_request();

    app.server
        .get("/api/records/not-a-number")
        .await
        .assert_status_bad_request();
    app.server.get("/api/records/42").await.assert_status_not_found();
}

#[tokio::test]
async fn malformed_task_ids_are_unknown_tasks() {
    let app = common::app().await;

    let response = app.server.get("/api/evaluation/tasks/not-a-uuid").await;
    response.assert_status_not_found();
    let body: ErrorResponse = response.json();
    assert!(!body.success);
    assert_eq!(body.detail, "task not found: not-a-uuid");

    app.server
        .post("/api/evaluation/tasks/not-a-uuid/cancel")
        .await
        .assert_status_not_found();
    app.server
        .get("/api/evaluation/tasks/not-a-uuid/report")
        .await
        .assert_status_not_found();
    app.server
        .get("/api/evaluation/tasks/01890a5d-ac96-774b-bcce-b302099a8057")
        .await
        .assert_status_not_found();
}

#[tokio::test]
async fn finished_tasks_cannot_be_cancelled() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b"], "dataset_name": "wikitext"}),
    )
    .await;
    common::wait_for_task(&app.server, &projection.id.to_string()).await;

    let response = app
        .server
        .post(&format!("/api/evaluation/tasks/{}/cancel", projection.id))
        .await;
    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn running_tasks_can_be_cancelled() {
    let monitor = Arc::new(StaticMonitor::new(
        common::gpu(),
        HostStatus::Unavailable {
            reason: "test".into(),
        },
    ));
    let slow = Arc::new(SimulatedHarness::new(Duration::from_secs(60)));
    let app = common::app_with(slow, monitor).await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b", "mistral-7b"], "dataset_name": "wikitext"}),
    )
    .await;

    let response = app
        .server
        .get(&format!("/api/evaluation/tasks/{}/report", projection.id))
        .await;
    response.assert_status(StatusCode::CONFLICT);

    let response = app
        .server
        .post(&format!("/api/evaluation/tasks/{}/cancel", projection.id))
        .await;
    response.assert_status_ok();

    let task = common::wait_for_task(&app.server, &projection.id.to_string()).await;
    assert_eq!(task.status, Status::Failed);
    assert!(
        task.runs
            .iter()
            .all(|r| r.error_message.as_deref() == Some("cancelled"))
    );

    let stats: ApiResponse<RecordStatistics> =
        app.server.get("/api/records/statistics").await.json();
    assert_eq!(stats.data.failed_records, 2);
}

#[tokio::test]
async fn event_stream_ends_with_the_terminal_snapshot() {
    let app = common::app().await;

    let projection = submit_batch(
        &app,
        json!({"model_paths": ["llama-7b", "mistral-7b"], "dataset_name": "wikitext"}),
    )
    .await;

    let response = app
        .server
        .get(&format!("/api/evaluation/tasks/{}/events", projection.id))
        .await;
    response.assert_status_ok();

    let text = response.text();
    assert!(text.contains("event: task"));
    let last: Task = text
        .lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .last()
        .map(|json| serde_json::from_str(json).unwrap())
        .unwrap();
    assert_eq!(last.id, projection.id);
    assert_eq!(last.status, Status::Completed);
}

#[tokio::test]
async fn queue_status_reports_capacity() {
    let app = common::app().await;

    let body: ApiResponse<QueueStatus> = app.server.get("/api/evaluation/queue").await.json();
    assert_eq!(body.data.max_concurrent_runs, 2);
    assert_eq!(body.data.in_flight_runs, 0);
    // 90% of the 80 GB card
    assert_eq!(body.data.memory_budget_mb, 73_728);
}

#[tokio::test]
async fn monitoring_reports_gpu_and_host() {
    let app = common::app().await;

    let gpu: ApiResponse<GpuStatus> = app.server.get("/api/monitoring/gpu/status").await.json();
    assert_eq!(gpu.data.devices().len(), 1);

    let smi = app.server.get("/api/monitoring/nvidia-smi").await;
    smi.assert_status_ok();
    let smi: ApiResponse<NvidiaSmiReport> = smi.json();
    assert!(smi.data.raw_output.contains("A100"));

    let host: ApiResponse<HostStatus> = app.server.get("/api/monitoring/system/info").await.json();
    assert!(host.data.metrics().is_none());

    let health = app.server.get("/api/monitoring/health").await;
    health.assert_status_ok();
    let _: ApiResponse<HealthStatus> = health.json();
}

#[tokio::test]
async fn missing_gpu_is_reported_not_failed() {
    let app = common::app_with(
        Arc::new(SimulatedHarness::new(Duration::ZERO)),
        Arc::new(StaticMonitor::unavailable()),
    )
    .await;

    let response = app.server.get("/api/monitoring/gpu/status").await;
    response.assert_status_ok();
    let gpu: ApiResponse<GpuStatus> = response.json();
    assert!(!gpu.data.is_available());

    let response = app.server.get("/api/monitoring/nvidia-smi").await;
    response.assert_status(StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorResponse = response.json();
    assert!(!body.success);
}
