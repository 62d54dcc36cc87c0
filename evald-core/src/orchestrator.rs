//! Job orchestrator: accepts submissions and drives tasks to completion.
//!
//! Submissions are validated against the registry, published on the
//! [`TaskBoard`] and handed to a dispatcher over a channel, so submitting
//! never waits on execution. The dispatcher spawns one driver per task. The
//! driver is the only writer of its task's state: it runs the task's runs
//! (in order, or all at once through a `JoinSet` for parallel batches),
//! appends one record per terminal run and settles the final status.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use evald_models::{Model, Registry};
use evald_monitor::ResourceMonitor;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::admission::{AdmissionController, QueueStatus};
use crate::config::OrchestratorConfig;
use crate::error::{Error, Result};
use crate::harness::{EvalOutcome, EvalRequest, Harness, HarnessError};
use crate::progress::{TaskBoard, TaskCounts};
use crate::record::NewRecord;
use crate::report::BatchReport;
use crate::storage::RecordStore;
use crate::task::{Run, Task, TaskProjection};
use crate::types::{RunConfig, Status, TaskId, TaskKind};

/// A batch evaluation request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub model_paths: Vec<String>,
    pub dataset_name: String,
    /// Generated from the dataset and time when absent or blank.
    #[serde(default)]
    pub task_name: Option<String>,
    #[serde(default)]
    pub parallel: bool,
    #[serde(default)]
    pub config: RunConfig,
    /// Stop the batch at the first failed run.
    #[serde(default)]
    pub fail_fast: bool,
}

/// A validated submission about to become a task.
struct Draft {
    task_name: String,
    kind: TaskKind,
    models: Vec<Model>,
    dataset_name: String,
    parallel: bool,
    fail_fast: bool,
    config: RunConfig,
}

/// Handed from submission to the dispatcher.
struct Job {
    id: TaskId,
    token: CancellationToken,
}

/// State shared by the orchestrator handle and every task driver.
struct Shared {
    config: OrchestratorConfig,
    store: Arc<dyn RecordStore>,
    harness: Arc<dyn Harness>,
    board: Arc<TaskBoard>,
    admission: AdmissionController,
    tokens: Mutex<HashMap<TaskId, CancellationToken>>,
}

/// Front door for evaluation work. Cheap to clone.
#[derive(Clone)]
pub struct Orchestrator {
    shared: Arc<Shared>,
    registry: Arc<Registry>,
    jobs: mpsc::UnboundedSender<Job>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
}

impl Orchestrator {
    /// Size admission from the monitor and start the dispatcher.
    pub async fn start(
        config: OrchestratorConfig,
        registry: Arc<Registry>,
        store: Arc<dyn RecordStore>,
        harness: Arc<dyn Harness>,
        monitor: Arc<dyn ResourceMonitor>,
    ) -> Self {
        let admission = AdmissionController::new(config.clone(), monitor).await;
        let board = Arc::new(TaskBoard::with_retention(config.retained_tasks));
        let shared = Arc::new(Shared {
            config,
            store,
            harness,
            board,
            admission,
            tokens: Mutex::new(HashMap::new()),
        });

        let (jobs, rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();
        let tracker = TaskTracker::new();
        tracker.spawn(dispatch(
            shared.clone(),
            rx,
            shutdown.clone(),
            tracker.clone(),
        ));

        Self {
            shared,
            registry,
            jobs,
            shutdown,
            tracker,
        }
    }

    /// Evaluate one model on one dataset.
    pub fn submit_single(
        &self,
        model_path: &str,
        dataset_name: &str,
        config: RunConfig,
    ) -> Result<Task> {
        let model = self.registry.models.get(model_path)?;
        self.registry.datasets.get(dataset_name)?;

        self.enqueue(Draft {
            task_name: format!("single-{}-{dataset_name}", model.name),
            kind: TaskKind::Single,
            models: vec![model],
            dataset_name: dataset_name.to_string(),
            parallel: false,
            fail_fast: false,
            config,
        })
    }

    /// Evaluate several models on one dataset.
    ///
    /// Nothing is created when any part of the request is rejected.
    pub fn submit_batch(&self, request: BatchRequest) -> Result<Task> {
        if request.model_paths.is_empty() {
            return Err(Error::InvalidArgument(
                "model_paths must contain at least one model".into(),
            ));
        }
        if request.model_paths.iter().any(|p| p.trim().is_empty()) {
            return Err(Error::InvalidArgument(
                "model_paths must not contain blank entries".into(),
            ));
        }
        self.registry.datasets.get(&request.dataset_name)?;

        let mut seen = HashSet::new();
        let mut models = Vec::with_capacity(request.model_paths.len());
        for path in &request.model_paths {
            let model = self.registry.models.get(path)?;
            if !seen.insert(model.path.clone()) {
                return Err(Error::InvalidArgument(format!(
                    "model listed more than once: {path}"
                )));
            }
            models.push(model);
        }

        let task_name = request
            .task_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "batch-{}-{}",
                    request.dataset_name,
                    Utc::now().format("%Y%m%d-%H%M%S")
                )
            });
        self.enqueue(Draft {
            task_name,
            kind: TaskKind::Batch,
            models,
            dataset_name: request.dataset_name,
            parallel: request.parallel,
            fail_fast: request.fail_fast,
            config: request.config,
        })
    }

    fn enqueue(&self, draft: Draft) -> Result<Task> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Shutdown);
        }
        let Draft {
            task_name,
            kind,
            models,
            dataset_name,
            parallel,
            fail_fast,
            config,
        } = draft;

        let runs = models
            .iter()
            .enumerate()
            .map(|(index, model)| {
                Run::new(
                    index,
                    model.path.clone(),
                    model.name.clone(),
                    model.model_type,
                    dataset_name.clone(),
                )
            })
            .collect();
        let task = Task {
            id: TaskId::new(),
            task_name,
            kind,
            model_paths: models.into_iter().map(|m| m.path).collect(),
            dataset_name,
            parallel,
            fail_fast,
            config,
            status: Status::Pending,
            progress: 0.0,
            runs,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            detail: None,
        };
        let id = task.id;

        let token = self.shutdown.child_token();
        self.shared
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, token.clone());
        self.shared.board.insert(task.clone());

        if self.jobs.send(Job { id, token }).is_err() {
            self.shared.board.update(id, |t| {
                t.advance(Status::Failed);
                t.detail = Some(Error::Shutdown.to_string());
            });
            return Err(Error::Shutdown);
        }

        info!(
            task_id = %id,
            task_name = %task.task_name,
            runs = task.runs.len(),
            parallel,
            "task accepted"
        );
        Ok(task)
    }

    /// Every task, newest first.
    #[must_use]
    pub fn list_tasks(&self) -> Vec<Task> {
        self.shared.board.list()
    }

    /// Summaries of every task, newest first.
    #[must_use]
    pub fn list_projections(&self) -> Vec<TaskProjection> {
        self.shared.board.projections()
    }

    /// Latest committed snapshot of a task.
    pub fn get_task_progress(&self, id: TaskId) -> Result<Task> {
        self.shared
            .board
            .get(id)
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// Follow a task's snapshots as they are committed.
    pub fn subscribe(&self, id: TaskId) -> Result<watch::Receiver<Task>> {
        self.shared
            .board
            .subscribe(id)
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// Request cancellation of a task.
    ///
    /// In-flight runs end `failed` with reason `cancelled`; runs that have
    /// not started are failed the same way without reaching the harness.
    pub fn cancel(&self, id: TaskId) -> Result<TaskProjection> {
        let task = self.get_task_progress(id)?;
        if task.is_terminal() {
            return Err(Error::InvalidState(format!("task {id} is already {}", task.status)));
        }

        let token = self
            .shared
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned();
        match token {
            Some(token) => token.cancel(),
            None => return Err(Error::InvalidState(format!("task {id} is finishing"))),
        }
        info!(task_id = %id, "task cancellation requested");

        self.shared
            .board
            .update(id, |t| {
                if !t.is_terminal() {
                    t.detail = Some("cancellation requested".into());
                }
            })
            .map(|t| t.projection())
            .ok_or_else(|| Error::not_found("task", id))
    }

    /// Summary report for a finished task.
    pub fn batch_report(&self, id: TaskId) -> Result<BatchReport> {
        let task = self.get_task_progress(id)?;
        if !task.is_terminal() {
            return Err(Error::InvalidState(format!(
                "task {id} is still {}",
                task.status
            )));
        }
        Ok(BatchReport::from_task(&task))
    }

    #[must_use]
    pub fn task_counts(&self) -> TaskCounts {
        self.shared.board.counts()
    }

    #[must_use]
    pub fn queue_status(&self) -> QueueStatus {
        let counts = self.task_counts();
        let admission = &self.shared.admission;
        QueueStatus {
            pending_tasks: counts.pending,
            running_tasks: counts.running,
            in_flight_runs: admission.in_flight(),
            max_concurrent_runs: admission.max_slots(),
            available_slots: admission.available_slots(),
            memory_budget_mb: admission.budget_mb(),
            available_memory_mb: admission.available_memory_mb(),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.shared.store
    }

    /// Stop accepting work, cancel every task and wait for drivers to exit.
    ///
    /// Every task is terminal once this returns.
    pub async fn shutdown(&self) {
        info!("orchestrator shutting down");
        self.shutdown.cancel();
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn dispatch(
    shared: Arc<Shared>,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    shutdown: CancellationToken,
    tracker: TaskTracker,
) {
    debug!("dispatcher started");
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => {
                    tracker.spawn(drive(shared.clone(), job));
                }
                None => break,
            },
        }
    }

    // Queued tasks still get a driver; their tokens are already cancelled,
    // so every run settles as failed without reaching the harness.
    jobs.close();
    while let Some(job) = jobs.recv().await {
        tracker.spawn(drive(shared.clone(), job));
    }
    debug!("dispatcher stopped");
}

async fn drive(shared: Arc<Shared>, job: Job) {
    let Job { id, token } = job;
    let Some(task) = shared.board.get(id) else {
        warn!(task_id = %id, "dispatched task vanished");
        return;
    };
    let run_count = task.runs.len();

    if task.parallel {
        let mut set = JoinSet::new();
        for index in 0..run_count {
            set.spawn(execute(shared.clone(), id, index, token.clone()));
        }
        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                error!(task_id = %id, error = %e, "run driver aborted");
            }
        }
    } else {
        for index in 0..run_count {
            execute(shared.clone(), id, index, token.clone()).await;
        }
    }

    finalize(&shared, id, &token).await;
}

/// Take one run from `pending` to a terminal state.
async fn execute(shared: Arc<Shared>, task_id: TaskId, index: usize, token: CancellationToken) {
    let Some(task) = shared.board.get(task_id) else {
        return;
    };
    let Some(run) = task.runs.get(index) else {
        return;
    };
    if run.status.is_terminal() {
        return;
    }
    if token.is_cancelled() {
        settle(&shared, &task, index, Err(HarnessError::Cancelled), None, &token).await;
        return;
    }

    let request = EvalRequest {
        task_id,
        run_index: index,
        model_path: run.model_path.clone(),
        model_name: run.model_name.clone(),
        dataset_name: run.dataset_name.clone(),
        config: task.config.clone(),
    };

    let demand = shared.admission.demand_mb(&task.config);
    let board = shared.board.clone();
    let model = run.model_path.clone();
    let on_delay = move |reason: String| {
        warn!(task_id = %task_id, model = %model, %reason, "run delayed by admission");
        board.update(task_id, |t| {
            if let Some(run) = t.runs.get_mut(index)
                && run.status == Status::Pending
            {
                run.pending_reason = Some(reason);
            }
        });
    };

    let permit = tokio::select! {
        permit = shared.admission.admit(demand, on_delay) => permit,
        () = token.cancelled() => {
            settle(&shared, &task, index, Err(HarnessError::Cancelled), None, &token).await;
            return;
        }
    };

    shared.board.update(task_id, |t| {
        if let Some(run) = t.runs.get_mut(index) {
            run.advance(Status::Running);
        }
        if t.status == Status::Pending {
            t.advance(Status::Running);
        }
    });
    info!(task_id = %task_id, run = index, model = %request.model_path, "run admitted");

    let started = Instant::now();
    let timeout = shared.config.harness_timeout();
    let evaluation = async {
        match timeout {
            Some(limit) => tokio::time::timeout(limit, shared.harness.evaluate(&request))
                .await
                .unwrap_or_else(|_| Err(HarnessError::Timeout(limit))),
            None => shared.harness.evaluate(&request).await,
        }
    };
    let result = tokio::select! {
        result = evaluation => result,
        () = token.cancelled() => Err(HarnessError::Cancelled),
    };
    let elapsed = started.elapsed();
    drop(permit);

    settle(&shared, &task, index, result, Some(elapsed), &token).await;
}

/// Record a run's outcome, then publish it as terminal.
///
/// The record is appended before the run turns terminal, so a poller that
/// sees a finished run can always find its record.
async fn settle(
    shared: &Shared,
    task: &Task,
    index: usize,
    result: std::result::Result<EvalOutcome, HarnessError>,
    elapsed: Option<Duration>,
    token: &CancellationToken,
) {
    let Some(run) = task.runs.get(index) else {
        return;
    };
    let elapsed_secs = elapsed.map(|d| d.as_secs_f64());

    let mut record = NewRecord {
        task_id: task.id,
        model_name: run.model_name.clone(),
        model_path: run.model_path.clone(),
        dataset_name: run.dataset_name.clone(),
        model_type: run.model_type,
        status: Status::Completed,
        score: None,
        execution_time: elapsed_secs,
        memory_usage: None,
        metrics: Default::default(),
        error_message: None,
        created_at: Utc::now(),
    };
    match result {
        Ok(outcome) => {
            record.score = Some(outcome.score);
            record.execution_time = outcome.execution_time.or(elapsed_secs);
            record.memory_usage = outcome.memory_usage;
            record.metrics = outcome.metrics;
            info!(
                task_id = %task.id,
                run = index,
                model = %run.model_path,
                score = outcome.score,
                "run completed"
            );
        }
        Err(e) => {
            record.status = Status::Failed;
            record.error_message = Some(e.to_string());
            info!(
                task_id = %task.id,
                run = index,
                model = %run.model_path,
                error = %e,
                "run failed"
            );
        }
    }

    let record_id = match shared.store.append(record.clone()).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(task_id = %task.id, run = index, error = %e, "failed to append record");
            None
        }
    };

    let failed = record.status == Status::Failed;
    shared.board.update(task.id, |t| {
        if let Some(run) = t.runs.get_mut(index)
            && run.advance(record.status)
        {
            run.score = record.score;
            run.execution_time = record.execution_time;
            run.memory_usage = record.memory_usage;
            run.metrics = record.metrics;
            run.error_message = record.error_message;
            run.record_id = record_id;
        }
        t.recompute_progress();
    });

    if failed && task.fail_fast && !token.is_cancelled() {
        info!(task_id = %task.id, run = index, "fail-fast: cancelling remaining runs");
        token.cancel();
    }
}

/// Settle anything left over and decide the task's final status.
async fn finalize(shared: &Shared, id: TaskId, token: &CancellationToken) {
    if let Some(task) = shared.board.get(id) {
        for run in task.runs.iter().filter(|r| !r.status.is_terminal()) {
            let reason = if token.is_cancelled() {
                HarnessError::Cancelled
            } else {
                HarnessError::Failed("run was interrupted".into())
            };
            settle(shared, &task, run.index, Err(reason), None, token).await;
        }
    }

    shared
        .tokens
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);

    let cancelled = HarnessError::Cancelled.to_string();
    let Some(task) = shared.board.update(id, |t| {
        let first_failure = t
            .runs
            .iter()
            .find(|r| {
                r.status == Status::Failed && r.error_message.as_deref() != Some(cancelled.as_str())
            })
            .map(|r| {
                format!(
                    "run {} ({}) failed: {}",
                    r.index,
                    r.model_name,
                    r.error_message.as_deref().unwrap_or("unknown error")
                )
            });

        let (status, detail) = match first_failure {
            Some(failure) if t.fail_fast => (Status::Failed, Some(format!("fail-fast: {failure}"))),
            _ if token.is_cancelled() => (Status::Failed, Some(cancelled.clone())),
            _ => (Status::Completed, None),
        };
        t.recompute_progress();
        if t.advance(status) {
            t.detail = detail;
        }
    }) else {
        return;
    };

    info!(
        task_id = %id,
        status = %task.status,
        completed = task.completed_runs(),
        failed = task.failed_runs(),
        "task finished"
    );
}
