//! End-to-end tests for task orchestration against a scripted harness.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use evald_core::{
    BatchRequest, EvalOutcome, EvalRequest, Error, Harness, HarnessError, MemoryRecordStore,
    MEMORY_ESTIMATE_KEY, Orchestrator, OrchestratorConfig, RecordQuery, RunConfig, SortOrder,
    Status, Task, TaskId, TaskKind,
};
use evald_models::{DatasetRegistry, Model, ModelRegistry, ModelType, Registry};
use evald_monitor::StaticMonitor;

#[derive(Clone, Copy)]
enum Script {
    Score(f64),
    Fail(&'static str),
    Hang,
}

/// Harness whose behaviour is fixed per model name.
struct ScriptedHarness {
    scripts: HashMap<String, Script>,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedHarness {
    fn new(scripts: &[(&str, Script)]) -> Arc<Self> {
        Self::with_delay(scripts, Duration::ZERO)
    }

    fn with_delay(scripts: &[(&str, Script)], delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            scripts: scripts
                .iter()
                .map(|(name, script)| (name.to_string(), *script))
                .collect(),
            delay,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Harness for ScriptedHarness {
    async fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutcome, HarnessError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let script = self
            .scripts
            .get(&request.model_name)
            .copied()
            .unwrap_or(Script::Score(0.5));
        let result = match script {
            Script::Score(score) => Ok(EvalOutcome {
                score,
                metrics: Default::default(),
                memory_usage: Some(1024.0),
                execution_time: None,
            }),
            Script::Fail(message) => Err(HarnessError::Failed(message.to_string())),
            Script::Hang => std::future::pending().await,
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

fn model(name: &str) -> Model {
    Model {
        path: format!("/models/{name}"),
        name: name.to_string(),
        model_type: ModelType::CausalLm,
        parameters: None,
        format: None,
        size_bytes: 0,
        file_count: 0,
        has_config: false,
        has_tokenizer: false,
        modified_at: None,
    }
}

fn registry() -> Arc<Registry> {
    Arc::new(Registry {
        models: ModelRegistry::with_models(["a", "b", "c", "d", "e"].map(model).to_vec()),
        datasets: DatasetRegistry::new(PathBuf::new()),
    })
}

async fn start(harness: Arc<ScriptedHarness>, config: OrchestratorConfig) -> Orchestrator {
    Orchestrator::start(
        config,
        registry(),
        Arc::new(MemoryRecordStore::new()),
        harness,
        Arc::new(StaticMonitor::unavailable()),
    )
    .await
}

fn batch(models: &[&str]) -> BatchRequest {
    BatchRequest {
        model_paths: models.iter().map(|m| format!("/models/{m}")).collect(),
        dataset_name: "wikitext".into(),
        ..Default::default()
    }
}

async fn wait_until(
    orchestrator: &Orchestrator,
    id: TaskId,
    done: impl FnMut(&Task) -> bool,
) -> Task {
    let mut rx = orchestrator.subscribe(id).unwrap();
    let task = tokio::time::timeout(Duration::from_secs(10), rx.wait_for(done))
        .await
        .expect("task did not reach the expected state")
        .unwrap()
        .clone();
    task
}

async fn wait_terminal(orchestrator: &Orchestrator, id: TaskId) -> Task {
    wait_until(orchestrator, id, Task::is_terminal).await
}

#[tokio::test]
async fn single_submission_completes_and_records() {
    let harness = ScriptedHarness::new(&[("a", Script::Score(0.91))]);
    let orchestrator = start(harness, OrchestratorConfig::default()).await;

    let task = orchestrator
        .submit_single("a", "wikitext", RunConfig::new())
        .unwrap();
    assert_eq!(task.kind, TaskKind::Single);
    assert_eq!(task.task_name, "single-a-wikitext");
    assert_eq!(task.status, Status::Pending);

    let task = wait_terminal(&orchestrator, task.id).await;
    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.progress, 100.0);
    assert_eq!(task.runs[0].score, Some(0.91));

    let record_id = task.runs[0].record_id.unwrap();
    let record = orchestrator.store().get(record_id).await.unwrap().unwrap();
    assert_eq!(record.status, Status::Completed);
    assert_eq!(record.score, Some(0.91));
    assert_eq!(record.task_id, task.id);
}

#[tokio::test]
async fn sequential_batch_continues_past_failures() {
    let harness = ScriptedHarness::new(&[("a", Script::Fail("oom")), ("b", Script::Score(0.8))]);
    let orchestrator = start(harness.clone(), OrchestratorConfig::default()).await;

    let task = orchestrator.submit_batch(batch(&["a", "b"])).unwrap();
    let task = wait_terminal(&orchestrator, task.id).await;

    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.failed_runs(), 1);
    assert_eq!(task.completed_runs(), 1);
    assert_eq!(task.progress, 100.0);
    assert_eq!(harness.calls(), 2);
    assert_eq!(
        task.runs[0].error_message.as_deref(),
        Some("evaluation failed: oom")
    );

    let page = orchestrator
        .store()
        .list(&RecordQuery {
            order: SortOrder::Asc,
            ..Default::default()
        })
        .await
        .unwrap();
    let statuses: Vec<_> = page.items.iter().map(|r| (r.model_name.as_str(), r.status)).collect();
    assert_eq!(statuses, [("a", Status::Failed), ("b", Status::Completed)]);
}

#[tokio::test]
async fn fail_fast_stops_the_batch() {
    let harness = ScriptedHarness::new(&[("a", Script::Fail("bad weights")), ("b", Script::Score(0.8))]);
    let orchestrator = start(harness.clone(), OrchestratorConfig::default()).await;

    let task = orchestrator
        .submit_batch(BatchRequest {
            fail_fast: true,
            ..batch(&["a", "b"])
        })
        .unwrap();
    let task = wait_terminal(&orchestrator, task.id).await;

    assert_eq!(task.status, Status::Failed);
    assert!(
        task.detail
            .as_deref()
            .unwrap()
            .starts_with("fail-fast: run 0 (a) failed")
    );
    assert_eq!(task.runs[1].status, Status::Failed);
    assert_eq!(task.runs[1].error_message.as_deref(), Some("cancelled"));
    assert_eq!(harness.calls(), 1);

    let stats = orchestrator.store().statistics().await.unwrap();
    assert_eq!(stats.total_records, 2);
    assert_eq!(stats.failed_records, 2);
}

#[tokio::test]
async fn parallel_batch_records_every_run() {
    let harness = ScriptedHarness::with_delay(&[], Duration::from_millis(20));
    let orchestrator = start(harness, OrchestratorConfig::default()).await;

    let task = orchestrator
        .submit_batch(BatchRequest {
            parallel: true,
            ..batch(&["a", "b", "c", "d", "e"])
        })
        .unwrap();

    let mut rx = orchestrator.subscribe(task.id).unwrap();
    let task = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if snapshot.progress >= 100.0 {
                assert!(snapshot.all_runs_terminal());
            }
            if snapshot.is_terminal() {
                return snapshot;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap();

    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.completed_runs(), 5);

    let page = orchestrator
        .store()
        .list(&RecordQuery::default())
        .await
        .unwrap();
    assert_eq!(page.total, 5);
    for record in &page.items {
        assert!(record.created_at >= task.created_at);
        assert_eq!(record.task_id, task.id);
    }
    let mut ids: Vec<_> = task.runs.iter().map(|r| r.record_id.unwrap()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 5);
}

#[tokio::test]
async fn concurrent_runs_respect_the_slot_limit() {
    let harness = ScriptedHarness::with_delay(&[], Duration::from_millis(30));
    let config = OrchestratorConfig {
        max_concurrent_runs: 2,
        ..Default::default()
    };
    let orchestrator = start(harness.clone(), config).await;

    let first = orchestrator
        .submit_batch(BatchRequest {
            parallel: true,
            ..batch(&["a", "b", "c"])
        })
        .unwrap();
    let second = orchestrator
        .submit_batch(BatchRequest {
            parallel: true,
            ..batch(&["d", "e"])
        })
        .unwrap();

    wait_terminal(&orchestrator, first.id).await;
    wait_terminal(&orchestrator, second.id).await;

    assert_eq!(harness.calls(), 5);
    assert!(harness.peak() <= 2, "peak concurrency was {}", harness.peak());
    assert_eq!(orchestrator.queue_status().in_flight_runs, 0);
    assert_eq!(orchestrator.queue_status().available_slots, 2);
}

#[tokio::test]
async fn sequential_batch_runs_one_model_at_a_time() {
    let harness = ScriptedHarness::with_delay(&[], Duration::from_millis(20));
    let config = OrchestratorConfig {
        max_concurrent_runs: 4,
        ..Default::default()
    };
    let orchestrator = start(harness.clone(), config).await;

    let task = orchestrator.submit_batch(batch(&["a", "b", "c"])).unwrap();
    let task = wait_terminal(&orchestrator, task.id).await;

    assert_eq!(task.completed_runs(), 3);
    assert_eq!(harness.calls(), 3);
    assert_eq!(harness.peak(), 1);
}

#[tokio::test]
async fn gpu_memory_budget_serializes_parallel_runs() {
    let harness = ScriptedHarness::with_delay(&[], Duration::from_millis(100));
    let config = OrchestratorConfig {
        max_concurrent_runs: 4,
        gpu_memory_ceiling_mb: 1_000,
        gpu_gating: false,
        resource_wait_warn_secs: 0,
        ..Default::default()
    };
    let orchestrator = start(harness.clone(), config).await;

    let mut run_config = RunConfig::new();
    run_config.insert(MEMORY_ESTIMATE_KEY.into(), serde_json::json!(600));
    let task = orchestrator
        .submit_batch(BatchRequest {
            parallel: true,
            config: run_config,
            ..batch(&["a", "b", "c"])
        })
        .unwrap();

    // Two runs cannot share the budget, so the others wait and say why.
    let waiting = wait_until(&orchestrator, task.id, |t| {
        t.runs
            .iter()
            .any(|r| r.status == Status::Pending && r.pending_reason.is_some())
    })
    .await;
    let reason = waiting
        .runs
        .iter()
        .find_map(|r| r.pending_reason.as_deref())
        .unwrap();
    assert!(reason.contains("600 MB of GPU memory"), "{reason}");

    let task = wait_terminal(&orchestrator, task.id).await;
    assert_eq!(task.completed_runs(), 3);
    assert_eq!(harness.peak(), 1, "peak concurrency was {}", harness.peak());
    assert!(task.runs.iter().all(|r| r.pending_reason.is_none()));
    assert_eq!(orchestrator.queue_status().available_memory_mb, 1_000);
}

#[tokio::test]
async fn rejected_batches_create_nothing() {
    let orchestrator = start(ScriptedHarness::new(&[]), OrchestratorConfig::default()).await;

    let err = orchestrator.submit_batch(batch(&[])).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = orchestrator.submit_batch(batch(&["a", "missing"])).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "model", .. }));

    let err = orchestrator
        .submit_batch(BatchRequest {
            dataset_name: "nope".into(),
            ..batch(&["a"])
        })
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "dataset", .. }));

    let err = orchestrator.submit_batch(batch(&["a", "a"])).unwrap_err();
    assert!(matches!(err, Error::InvalidArgument(_)));

    let err = orchestrator
        .submit_single("missing", "wikitext", RunConfig::new())
        .unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "model", .. }));

    assert!(orchestrator.list_tasks().is_empty());
    assert_eq!(orchestrator.task_counts().total(), 0);
}

#[tokio::test]
async fn cancel_fails_running_and_pending_runs() {
    let harness = ScriptedHarness::new(&[("a", Script::Hang)]);
    let orchestrator = start(harness.clone(), OrchestratorConfig::default()).await;

    let task = orchestrator.submit_batch(batch(&["a", "b"])).unwrap();
    wait_until(&orchestrator, task.id, |t| t.runs[0].status == Status::Running).await;

    let projection = orchestrator.cancel(task.id).unwrap();
    assert_eq!(projection.id, task.id);

    let task = wait_terminal(&orchestrator, task.id).await;
    assert_eq!(task.status, Status::Failed);
    assert_eq!(task.detail.as_deref(), Some("cancelled"));
    for run in &task.runs {
        assert_eq!(run.status, Status::Failed);
        assert_eq!(run.error_message.as_deref(), Some("cancelled"));
        assert!(run.record_id.is_some());
    }
    assert_eq!(harness.calls(), 1);

    let err = orchestrator.cancel(task.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test(start_paused = true)]
async fn harness_timeout_fails_the_run() {
    let harness = ScriptedHarness::new(&[("a", Script::Hang)]);
    let config = OrchestratorConfig {
        harness_timeout_secs: 1,
        ..Default::default()
    };
    let orchestrator = start(harness, config).await;

    let task = orchestrator
        .submit_single("a", "wikitext", RunConfig::new())
        .unwrap();
    let task = wait_terminal(&orchestrator, task.id).await;

    assert_eq!(task.status, Status::Completed);
    assert_eq!(task.runs[0].status, Status::Failed);
    assert_eq!(task.runs[0].error_message.as_deref(), Some("timed out after 1s"));
}

#[tokio::test]
async fn report_requires_a_finished_task() {
    let harness = ScriptedHarness::new(&[("a", Script::Hang)]);
    let orchestrator = start(harness, OrchestratorConfig::default()).await;

    let task = orchestrator.submit_batch(batch(&["a"])).unwrap();
    let err = orchestrator.batch_report(task.id).unwrap_err();
    assert!(matches!(err, Error::InvalidState(_)));

    orchestrator.cancel(task.id).unwrap();
    wait_terminal(&orchestrator, task.id).await;
    let report = orchestrator.batch_report(task.id).unwrap();
    assert_eq!(report.summary.failed, 1);

    let err = orchestrator.batch_report(TaskId::new()).unwrap_err();
    assert!(matches!(err, Error::NotFound { kind: "task", .. }));
}

#[tokio::test]
async fn completed_records_can_be_promoted() {
    let harness = ScriptedHarness::new(&[("a", Script::Score(0.9)), ("b", Script::Fail("nan"))]);
    let orchestrator = start(harness, OrchestratorConfig::default()).await;

    let task = orchestrator.submit_batch(batch(&["a", "b"])).unwrap();
    let task = wait_terminal(&orchestrator, task.id).await;

    let store = orchestrator.store();
    let good = task.runs[0].record_id.unwrap();
    let excellent = store
        .promote(good, Some("best so far".into()), None)
        .await
        .unwrap();
    assert_eq!(excellent.record_id, good);
    assert_eq!(excellent.category, "general");

    let bad = task.runs[1].record_id.unwrap();
    let err: Error = store.promote(bad, None, None).await.unwrap_err().into();
    assert!(matches!(err, Error::InvalidState(_)));
}

#[tokio::test]
async fn listing_is_newest_first() {
    let orchestrator = start(ScriptedHarness::new(&[]), OrchestratorConfig::default()).await;

    let older = orchestrator.submit_batch(batch(&["a"])).unwrap();
    let newer = orchestrator.submit_batch(batch(&["b"])).unwrap();

    let ids: Vec<_> = orchestrator.list_tasks().iter().map(|t| t.id).collect();
    assert_eq!(ids, [newer.id, older.id]);

    wait_terminal(&orchestrator, older.id).await;
    wait_terminal(&orchestrator, newer.id).await;
    assert_eq!(orchestrator.task_counts().completed, 2);
}

#[tokio::test]
async fn shutdown_rejects_new_work() {
    let orchestrator = start(ScriptedHarness::new(&[]), OrchestratorConfig::default()).await;
    orchestrator.shutdown().await;

    let err = orchestrator.submit_batch(batch(&["a"])).unwrap_err();
    assert!(matches!(err, Error::Shutdown));
}
