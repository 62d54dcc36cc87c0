//! Tasks, their runs, and the list projection served to pollers.

use chrono::{DateTime, Utc};
use evald_models::ModelType;
use serde::{Deserialize, Serialize};

use crate::types::{Metrics, RecordId, RunConfig, Status, TaskId, TaskKind};

/// Execution of one model against one dataset within a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Run {
    /// Position within the task's submission order.
    pub index: usize,
    pub model_path: String,
    pub model_name: String,
    pub model_type: ModelType,
    pub dataset_name: String,
    pub status: Status,
    pub score: Option<f64>,
    pub execution_time: Option<f64>,
    pub memory_usage: Option<f64>,
    pub metrics: Metrics,
    pub error_message: Option<String>,
    /// Why a pending run has not started yet, e.g. waiting for GPU memory.
    pub pending_reason: Option<String>,
    pub record_id: Option<RecordId>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Run {
    pub(crate) fn new(
        index: usize,
        model_path: String,
        model_name: String,
        model_type: ModelType,
        dataset_name: String,
    ) -> Self {
        Self {
            index,
            model_path,
            model_name,
            model_type,
            dataset_name,
            status: Status::Pending,
            score: None,
            execution_time: None,
            memory_usage: None,
            metrics: Metrics::new(),
            error_message: None,
            pending_reason: None,
            record_id: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Move to `next` if that is a forward transition.
    ///
    /// Returns `false` and leaves the run untouched otherwise.
    pub(crate) fn advance(&mut self, next: Status) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                run = self.index,
                from = %self.status,
                to = %next,
                "ignoring backward run transition"
            );
            return false;
        }
        self.status = next;
        match next {
            Status::Running => {
                self.started_at = Some(Utc::now());
                self.pending_reason = None;
            }
            Status::Completed | Status::Failed => {
                self.completed_at = Some(Utc::now());
                self.pending_reason = None;
            }
            Status::Pending => {}
        }
        true
    }
}

/// A submitted evaluation request and all of its runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub task_name: String,
    pub kind: TaskKind,
    pub model_paths: Vec<String>,
    pub dataset_name: String,
    pub parallel: bool,
    pub fail_fast: bool,
    pub config: RunConfig,
    pub status: Status,
    /// Percentage of runs in a terminal state; never decreases.
    pub progress: f64,
    pub runs: Vec<Run>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Why the task failed, when it did.
    pub detail: Option<String>,
}

impl Task {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn completed_runs(&self) -> usize {
        self.count_runs(Status::Completed)
    }

    #[must_use]
    pub fn failed_runs(&self) -> usize {
        self.count_runs(Status::Failed)
    }

    #[must_use]
    pub fn running_runs(&self) -> usize {
        self.count_runs(Status::Running)
    }

    fn count_runs(&self, status: Status) -> usize {
        self.runs.iter().filter(|r| r.status == status).count()
    }

    #[must_use]
    pub fn all_runs_terminal(&self) -> bool {
        self.runs.iter().all(|r| r.status.is_terminal())
    }

    /// Recompute progress from run states, never moving it backwards.
    pub(crate) fn recompute_progress(&mut self) {
        if self.runs.is_empty() {
            return;
        }
        let terminal = self.runs.iter().filter(|r| r.status.is_terminal()).count();
        let progress = terminal as f64 / self.runs.len() as f64 * 100.0;
        self.progress = self.progress.max(progress).min(100.0);
    }

    /// Move the task to `next` if that is a forward transition.
    pub(crate) fn advance(&mut self, next: Status) -> bool {
        if !self.status.can_advance_to(next) {
            tracing::warn!(
                task_id = %self.id,
                from = %self.status,
                to = %next,
                "ignoring backward task transition"
            );
            return false;
        }
        self.status = next;
        match next {
            Status::Running => self.started_at = Some(Utc::now()),
            Status::Completed | Status::Failed => self.completed_at = Some(Utc::now()),
            Status::Pending => {}
        }
        true
    }

    /// Summary served by task listings.
    #[must_use]
    pub fn projection(&self) -> TaskProjection {
        TaskProjection {
            id: self.id,
            task_name: self.task_name.clone(),
            kind: self.kind,
            dataset_name: self.dataset_name.clone(),
            model_count: self.runs.len(),
            status: self.status,
            progress: self.progress,
            created_at: self.created_at,
            completed_runs: self.completed_runs(),
            failed_runs: self.failed_runs(),
        }
    }
}

/// Lightweight view of a task for list endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskProjection {
    pub id: TaskId,
    pub task_name: String,
    pub kind: TaskKind,
    pub dataset_name: String,
    pub model_count: usize,
    pub status: Status,
    pub progress: f64,
    pub created_at: DateTime<Utc>,
    pub completed_runs: usize,
    pub failed_runs: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task_with_runs(n: usize) -> Task {
        Task {
            id: TaskId::new(),
            task_name: "t".into(),
            kind: TaskKind::Batch,
            model_paths: (0..n).map(|i| format!("m{i}")).collect(),
            dataset_name: "ds1".into(),
            parallel: false,
            fail_fast: false,
            config: RunConfig::new(),
            status: Status::Pending,
            progress: 0.0,
            runs: (0..n)
                .map(|i| {
                    Run::new(
                        i,
                        format!("m{i}"),
                        format!("m{i}"),
                        ModelType::Unknown,
                        "ds1".into(),
                    )
                })
                .collect(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            detail: None,
        }
    }

    #[test]
    fn progress_counts_terminal_runs() {
        let mut task = task_with_runs(4);
        task.runs[0].advance(Status::Running);
        task.recompute_progress();
        assert_eq!(task.progress, 0.0);

        task.runs[0].advance(Status::Failed);
        task.runs[1].advance(Status::Completed);
        task.recompute_progress();
        assert_eq!(task.progress, 50.0);

        for run in &mut task.runs[2..] {
            run.advance(Status::Completed);
        }
        task.recompute_progress();
        assert_eq!(task.progress, 100.0);
        assert!(task.all_runs_terminal());
    }

    #[test]
    fn progress_never_decreases() {
        let mut task = task_with_runs(2);
        task.progress = 75.0;
        task.runs[0].advance(Status::Completed);
        task.recompute_progress();
        assert_eq!(task.progress, 75.0);
    }

    #[test]
    fn terminal_run_rejects_further_transitions() {
        let mut task = task_with_runs(1);
        let run = &mut task.runs[0];

        assert!(run.advance(Status::Running));
        assert!(run.advance(Status::Completed));
        assert!(!run.advance(Status::Failed));
        assert!(!run.advance(Status::Running));
        assert_eq!(run.status, Status::Completed);
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn projection_summarizes_runs() {
        let mut task = task_with_runs(3);
        task.runs[0].advance(Status::Completed);
        task.runs[1].advance(Status::Failed);

        let projection = task.projection();

        assert_eq!(projection.model_count, 3);
        assert_eq!(projection.completed_runs, 1);
        assert_eq!(projection.failed_runs, 1);
        assert_eq!(projection.status, Status::Pending);
    }
}
