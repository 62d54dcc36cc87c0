//! Evaluation records and the curated "excellent" relation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use evald_models::ModelType;
use serde::{Deserialize, Serialize};

use crate::types::{ExcellentId, Metrics, RecordId, Status, TaskId};

/// Reason stored when a promotion does not give one.
pub const DEFAULT_EXCELLENT_REASON: &str = "selected by operator";

/// Category stored when a promotion does not give one.
pub const DEFAULT_EXCELLENT_CATEGORY: &str = "general";

/// Persisted outcome of one terminal run. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub task_id: TaskId,
    pub model_name: String,
    pub model_path: String,
    pub dataset_name: String,
    pub model_type: ModelType,
    /// Either `completed` or `failed`.
    pub status: Status,
    pub score: Option<f64>,
    /// Wall-clock seconds spent in the harness.
    pub execution_time: Option<f64>,
    /// Peak memory in MB as reported by the harness.
    pub memory_usage: Option<f64>,
    pub metrics: Metrics,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A record before the store has assigned its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    pub task_id: TaskId,
    pub model_name: String,
    pub model_path: String,
    pub dataset_name: String,
    pub model_type: ModelType,
    pub status: Status,
    pub score: Option<f64>,
    pub execution_time: Option<f64>,
    pub memory_usage: Option<f64>,
    pub metrics: Metrics,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewRecord {
    pub(crate) fn into_record(self, id: RecordId) -> Record {
        Record {
            id,
            task_id: self.task_id,
            model_name: self.model_name,
            model_path: self.model_path,
            dataset_name: self.dataset_name,
            model_type: self.model_type,
            status: self.status,
            score: self.score,
            execution_time: self.execution_time,
            memory_usage: self.memory_usage,
            metrics: self.metrics,
            error_message: self.error_message,
            created_at: self.created_at,
        }
    }
}

/// Marks a completed record as noteworthy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcellentRecord {
    pub id: ExcellentId,
    pub record_id: RecordId,
    pub reason: String,
    pub category: String,
    pub created_at: DateTime<Utc>,
}

/// An excellent marker together with the record it points at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExcellentEntry {
    pub excellent: ExcellentRecord,
    pub record: Record,
}

/// Number of excellent markers carrying one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryCount {
    pub category: String,
    pub count: u64,
}

/// Aggregate view over the excellent markers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExcellentSummary {
    pub total_excellent: u64,
    pub category_distribution: BTreeMap<String, u64>,
    pub model_type_distribution: BTreeMap<String, u64>,
    /// Mean score of the records behind the markers.
    pub average_score: Option<f64>,
    /// Newest markers first.
    pub recent_additions: Vec<ExcellentEntry>,
}

/// Markers listed in the summary's `recent_additions`.
pub const RECENT_EXCELLENT_LIMIT: usize = 5;

/// Aggregate view over every stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordStatistics {
    pub total_records: u64,
    pub successful_records: u64,
    pub failed_records: u64,
    /// Fraction of records that completed, in `[0, 1]`.
    pub success_rate: f64,
    /// Mean over records that carry a score.
    pub average_score: Option<f64>,
    pub model_type_distribution: BTreeMap<String, u64>,
    /// Records created during the last seven days.
    pub recent_records: u64,
}

impl RecordStatistics {
    pub(crate) fn with_rate(mut self) -> Self {
        self.success_rate = if self.total_records == 0 {
            0.0
        } else {
            self.successful_records as f64 / self.total_records as f64
        };
        self
    }
}

/// Position of a model on a dataset leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ranking {
    pub rank: usize,
    pub record_id: RecordId,
    pub model_name: String,
    pub model_path: String,
    pub model_type: ModelType,
    pub score: f64,
    pub created_at: DateTime<Utc>,
}

/// Build a leaderboard from completed records already sorted best-first.
///
/// Only the best record of each model is ranked.
pub(crate) fn rank_best<'a>(
    sorted: impl IntoIterator<Item = &'a Record>,
    limit: usize,
) -> Vec<Ranking> {
    let mut seen = std::collections::HashSet::new();
    sorted
        .into_iter()
        .filter_map(|r| r.score.map(|score| (r, score)))
        .filter(|(r, _)| seen.insert(r.model_path.clone()))
        .take(limit)
        .enumerate()
        .map(|(i, (r, score))| Ranking {
            rank: i + 1,
            record_id: r.id,
            model_name: r.model_name.clone(),
            model_path: r.model_path.clone(),
            model_type: r.model_type,
            score,
            created_at: r.created_at,
        })
        .collect()
}
