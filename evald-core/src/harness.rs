//! Evaluation harness: the black box that scores one model on one dataset.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::types::{Metrics, RunConfig, TaskId};

/// Input handed to a harness for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalRequest {
    pub task_id: TaskId,
    pub run_index: usize,
    pub model_path: String,
    pub model_name: String,
    pub dataset_name: String,
    pub config: RunConfig,
}

/// What a successful evaluation reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalOutcome {
    pub score: f64,
    #[serde(default)]
    pub metrics: Metrics,
    /// Peak memory in MB.
    #[serde(default)]
    pub memory_usage: Option<f64>,
    /// Seconds; measured by the orchestrator when the harness omits it.
    #[serde(default)]
    pub execution_time: Option<f64>,
}

/// Why a harness call did not produce an outcome.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("evaluation failed: {0}")]
    Failed(String),

    #[error("invalid harness output: {0}")]
    InvalidOutput(String),

    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("cancelled")]
    Cancelled,
}

/// Runs a single evaluation.
///
/// Implementations must be safe to call concurrently from parallel runs.
#[async_trait]
pub trait Harness: Send + Sync {
    async fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutcome, HarnessError>;
}

/// Runs an external program per evaluation.
///
/// The request is written to stdin as JSON and an [`EvalOutcome`] is read
/// back from stdout. A non-zero exit is a failure carrying stderr.
pub struct CommandHarness {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandHarness {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

#[async_trait]
impl Harness for CommandHarness {
    async fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutcome, HarnessError> {
        let program = self.program.display().to_string();
        let payload = serde_json::to_vec(request)
            .map_err(|e| HarnessError::InvalidOutput(e.to_string()))?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: program.clone(),
                source,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A harness that ignores stdin may close it early.
            if let Err(e) = stdin.write_all(&payload).await {
                debug!(%program, error = %e, "harness closed stdin");
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|source| HarnessError::Spawn { program, source })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(HarnessError::Failed(if stderr.is_empty() {
                format!("harness exited with {}", output.status)
            } else {
                stderr
            }));
        }

        serde_json::from_slice(&output.stdout)
            .map_err(|e| HarnessError::InvalidOutput(e.to_string()))
    }
}

/// Deterministic stand-in for a real evaluator.
///
/// Scores and memory usage derive from a hash of the model path so repeated
/// runs of the same model agree. Setting `"fail": true` in the run config
/// makes the evaluation fail.
pub struct SimulatedHarness {
    delay: Duration,
}

impl SimulatedHarness {
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Harness for SimulatedHarness {
    async fn evaluate(&self, request: &EvalRequest) -> Result<EvalOutcome, HarnessError> {
        let started = Instant::now();
        tokio::time::sleep(self.delay).await;

        if request
            .config
            .get("fail")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false)
        {
            return Err(HarnessError::Failed(format!(
                "simulated failure for {}",
                request.model_name
            )));
        }

        let mut hasher = DefaultHasher::new();
        request.model_path.hash(&mut hasher);
        let hash = hasher.finish();
        let score = 0.75 + (hash % 100) as f64 / 1000.0;

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".into(), score.into());
        metrics.insert("f1_score".into(), (score - 0.02).into());
        metrics.insert("precision".into(), (score + 0.01).into());
        metrics.insert("recall".into(), (score - 0.01).into());

        Ok(EvalOutcome {
            score,
            metrics,
            memory_usage: Some(2048.0 + (hash % 1024) as f64),
            execution_time: Some(started.elapsed().as_secs_f64()),
        })
    }
}
