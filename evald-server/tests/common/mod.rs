//! Shared test utilities for evald-server integration tests

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use evald_core::{
    Harness, MemoryRecordStore, Orchestrator, OrchestratorConfig, SimulatedHarness, Task,
};
use evald_models::{DatasetRegistry, Model, ModelRegistry, ModelType, Registry};
use evald_monitor::{GpuDevice, GpuStatus, HostStatus, ResourceMonitor, StaticMonitor};
use evald_server::{ApiResponse, AppState, create_router};
use tempfile::TempDir;

pub struct TestApp {
    pub server: TestServer,
    pub state: Arc<AppState>,
    _datasets: TempDir,
}

pub fn model(name: &str, model_type: ModelType) -> Model {
    Model {
        path: format!("/models/{name}"),
        name: name.to_string(),
        model_type,
        parameters: Some(7_000_000_000),
        format: Some("safetensors".into()),
        size_bytes: 1 << 30,
        file_count: 3,
        has_config: true,
        has_tokenizer: true,
        modified_at: None,
    }
}

pub fn gpu() -> GpuStatus {
    GpuStatus::Available {
        devices: vec![GpuDevice {
            index: 0,
            name: "NVIDIA A100-SXM4-80GB".into(),
            uuid: Some("GPU-0000".into()),
            utilization_percent: Some(10.0),
            memory_used_mb: Some(1_000),
            memory_total_mb: Some(81_920),
            temperature_c: Some(40.0),
            power_draw_w: Some(80.0),
            power_limit_w: Some(400.0),
        }],
    }
}

/// App with three models, a GPU and an instant simulated harness.
#[allow(dead_code)]
pub async fn app() -> TestApp {
    let monitor = Arc::new(StaticMonitor::new(
        gpu(),
        HostStatus::Unavailable {
            reason: "not sampled in tests".into(),
        },
    ));
    app_with(Arc::new(SimulatedHarness::new(Duration::ZERO)), monitor).await
}

pub async fn app_with(harness: Arc<dyn Harness>, monitor: Arc<dyn ResourceMonitor>) -> TestApp {
    let datasets = TempDir::new().unwrap();
    let registry = Arc::new(Registry {
        models: ModelRegistry::with_models(vec![
            model("llama-7b", ModelType::CausalLm),
            model("mistral-7b", ModelType::CausalLm),
            model("bge-base", ModelType::Embedding),
        ]),
        datasets: DatasetRegistry::new(datasets.path()),
    });
    let orchestrator = Orchestrator::start(
        OrchestratorConfig::default(),
        registry,
        Arc::new(MemoryRecordStore::new()),
        harness,
        monitor.clone(),
    )
    .await;

    let state = Arc::new(AppState::new(orchestrator, monitor));
    let server = TestServer::new(create_router(Arc::clone(&state))).unwrap();
    TestApp {
        server,
        state,
        _datasets: datasets,
    }
}

/// Poll a task over HTTP until it is terminal.
#[allow(dead_code)]
pub async fn wait_for_task(server: &TestServer, id: &str) -> Task {
    for _ in 0..500 {
        let body: ApiResponse<Task> = server
            .get(&format!("/api/evaluation/tasks/{id}"))
            .await
            .json();
        if body.data.is_terminal() {
            return body.data;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("task {id} did not finish");
}
