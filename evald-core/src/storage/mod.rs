//! Record storage.
//!
//! - [`RecordStore`] - append-only record log with paged queries and the
//!   excellent-record relation
//! - [`MemoryRecordStore`] - process-local store for tests and ephemeral runs
//! - [`LibsqlRecordStore`] - persistent store backed by an embedded libSQL file

mod error;
mod memory;
mod sqlite;

pub use error::{Error, Result};
pub use memory::MemoryRecordStore;
pub use sqlite::LibsqlRecordStore;

use std::cmp::Ordering;

use async_trait::async_trait;
use evald_models::ModelType;
use serde::{Deserialize, Serialize};

use crate::record::{
    CategoryCount, ExcellentEntry, ExcellentRecord, ExcellentSummary, NewRecord, Ranking, Record,
    RecordStatistics,
};
use crate::types::{ExcellentId, RecordId, Status, TaskId};

/// Default page size for record listings.
pub const DEFAULT_LIMIT: u32 = 20;

/// Largest page size a caller may request.
pub const MAX_LIMIT: u32 = 100;

/// Append-only store of evaluation records.
///
/// Implementations must assign ids and append atomically so concurrent
/// appends from parallel runs never lose a write or reuse an id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append a record and return its id.
    async fn append(&self, record: NewRecord) -> Result<RecordId>;

    /// Get a record by id.
    async fn get(&self, id: RecordId) -> Result<Option<Record>>;

    /// List records matching the query, one page at a time.
    async fn list(&self, query: &RecordQuery) -> Result<RecordPage>;

    /// Mark a completed record as excellent.
    ///
    /// Fails with [`Error::RecordNotFound`] when the record is absent and
    /// [`Error::NotPromotable`] when it is not `completed`.
    async fn promote(
        &self,
        id: RecordId,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<ExcellentRecord>;

    /// Remove every excellent marker of a record and return them.
    ///
    /// Fails with [`Error::RecordNotFound`] when the record is absent and
    /// [`Error::NotExcellent`] when it carries no marker.
    async fn demote(&self, id: RecordId) -> Result<Vec<ExcellentRecord>>;

    /// Change the reason or category of one marker. Absent fields are kept.
    async fn update_excellent(
        &self,
        id: ExcellentId,
        update: ExcellentUpdate,
    ) -> Result<ExcellentRecord>;

    /// List excellent markers, newest first.
    async fn list_excellent(&self, query: &ExcellentQuery) -> Result<Vec<ExcellentEntry>>;

    /// Totals and distributions over the excellent markers.
    async fn excellent_summary(&self) -> Result<ExcellentSummary>;

    /// Marker count per category, by category name.
    async fn excellent_categories(&self) -> Result<Vec<CategoryCount>>;

    /// Aggregate counts over all records.
    async fn statistics(&self) -> Result<RecordStatistics>;

    /// Best completed score per model on a dataset, highest first.
    async fn rankings(&self, dataset_name: &str, limit: usize) -> Result<Vec<Ranking>>;
}

/// Field to sort records by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    Score,
}

impl SortField {
    pub(crate) fn column(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::Score => "score",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub(crate) fn keyword(&self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

/// Filter, sort and paging options for record listings.
///
/// `model_name` matches case-insensitive substrings; every other filter is
/// exact. Ties in the sort key are broken by id in the same direction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordQuery {
    pub task_id: Option<TaskId>,
    pub model_name: Option<String>,
    pub dataset_name: Option<String>,
    pub status: Option<Status>,
    pub model_type: Option<ModelType>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub sort: SortField,
    pub order: SortOrder,
    /// 1-based page number.
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

impl RecordQuery {
    /// Page number, at least 1.
    #[must_use]
    pub fn page(&self) -> u32 {
        self.page.unwrap_or(1).max(1)
    }

    /// Page size, clamped to `1..=MAX_LIMIT`.
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    #[must_use]
    pub fn offset(&self) -> u64 {
        u64::from(self.page() - 1) * u64::from(self.limit())
    }

    pub(crate) fn matches(&self, record: &Record) -> bool {
        let name_matches = self.model_name.as_ref().is_none_or(|name| {
            record
                .model_name
                .to_lowercase()
                .contains(&name.to_lowercase())
        });
        name_matches
            && self.task_id.is_none_or(|id| id == record.task_id)
            && self
                .dataset_name
                .as_ref()
                .is_none_or(|d| *d == record.dataset_name)
            && self.status.is_none_or(|s| s == record.status)
            && self.model_type.is_none_or(|t| t == record.model_type)
            && self
                .min_score
                .is_none_or(|min| record.score.is_some_and(|s| s >= min))
            && self
                .max_score
                .is_none_or(|max| record.score.is_some_and(|s| s <= max))
    }

    /// Ordering consistent with the SQL `ORDER BY` used by the libSQL store.
    pub(crate) fn compare(&self, a: &Record, b: &Record) -> Ordering {
        let key = match self.sort {
            SortField::CreatedAt => a.created_at.cmp(&b.created_at),
            SortField::Score => compare_scores(a.score, b.score),
        };
        let ordering = key.then(a.id.cmp(&b.id));
        match self.order {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    }
}

/// Missing scores sort below every present score, as NULL does in SQLite.
fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.total_cmp(&b),
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
    }
}

/// One page of records plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordPage {
    pub items: Vec<Record>,
    pub total: u64,
    pub page: u32,
    pub limit: u32,
}

/// Options for listing excellent records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcellentQuery {
    pub category: Option<String>,
    pub limit: Option<u32>,
}

impl ExcellentQuery {
    #[must_use]
    pub fn limit(&self) -> u32 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }
}

/// New values for an excellent marker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExcellentUpdate {
    pub reason: Option<String>,
    pub category: Option<String>,
}

impl ExcellentUpdate {
    pub(crate) fn apply(self, excellent: &mut ExcellentRecord) {
        if let Some(reason) = self.reason {
            excellent.reason = reason;
        }
        if let Some(category) = self.category {
            excellent.category = category;
        }
    }
}

/// Fold entries, newest first, into a summary.
pub(crate) fn summarize(entries: &[ExcellentEntry]) -> ExcellentSummary {
    let mut summary = ExcellentSummary {
        total_excellent: entries.len() as u64,
        ..Default::default()
    };
    let (mut score_sum, mut scored) = (0.0, 0u64);
    for entry in entries {
        *summary
            .category_distribution
            .entry(entry.excellent.category.clone())
            .or_default() += 1;
        *summary
            .model_type_distribution
            .entry(entry.record.model_type.to_string())
            .or_default() += 1;
        if let Some(score) = entry.record.score {
            score_sum += score;
            scored += 1;
        }
    }
    summary.average_score = (scored > 0).then(|| score_sum / scored as f64);
    summary.recent_additions = entries
        .iter()
        .take(crate::record::RECENT_EXCELLENT_LIMIT)
        .cloned()
        .collect();
    summary
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{DateTime, Duration, Utc};
    use evald_models::ModelType;

    use crate::record::NewRecord;
    use crate::types::{Metrics, Status, TaskId};

    pub fn completed(model: &str, dataset: &str, score: f64) -> NewRecord {
        NewRecord {
            task_id: TaskId::new(),
            model_name: model.to_string(),
            model_path: format!("/models/{model}"),
            dataset_name: dataset.to_string(),
            model_type: ModelType::CausalLm,
            status: Status::Completed,
            score: Some(score),
            execution_time: Some(1.5),
            memory_usage: Some(2048.0),
            metrics: Metrics::new(),
            error_message: None,
            created_at: Utc::now(),
        }
    }

    pub fn failed(model: &str, dataset: &str) -> NewRecord {
        NewRecord {
            status: Status::Failed,
            score: None,
            execution_time: None,
            memory_usage: None,
            error_message: Some("harness exited with status 1".to_string()),
            ..completed(model, dataset, 0.0)
        }
    }

    pub fn at(mut record: NewRecord, created_at: DateTime<Utc>) -> NewRecord {
        record.created_at = created_at;
        record
    }

    pub fn days_ago(days: i64) -> DateTime<Utc> {
        Utc::now() - Duration::days(days)
    }
}
