//! In-memory record store.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tracing::instrument;

use super::{
    Error, ExcellentQuery, ExcellentUpdate, RecordPage, RecordQuery, RecordStore, Result,
    summarize,
};
use crate::record::{
    CategoryCount, DEFAULT_EXCELLENT_CATEGORY, DEFAULT_EXCELLENT_REASON, ExcellentEntry,
    ExcellentRecord, ExcellentSummary, NewRecord, Ranking, Record, RecordStatistics, rank_best,
};
use crate::types::{ExcellentId, RecordId, Status};

#[derive(Default)]
struct State {
    records: Vec<Record>,
    excellent: Vec<ExcellentRecord>,
    /// Markers can be removed, so their ids come from a counter.
    last_excellent_id: u64,
}

impl State {
    /// Markers joined to their records, newest first.
    fn entries<'a>(
        &'a self,
        category: Option<&'a str>,
    ) -> impl Iterator<Item = ExcellentEntry> + 'a {
        self.excellent
            .iter()
            .rev()
            .filter(move |e| category.is_none_or(|c| c == e.category))
            .filter_map(|e| {
                self.records
                    .iter()
                    .find(|r| r.id == e.record_id)
                    .map(|record| ExcellentEntry {
                        excellent: e.clone(),
                        record: record.clone(),
                    })
            })
    }
}

/// Record store held in process memory.
///
/// Records and excellent markers live behind one lock, so id assignment and
/// the push that follows it are a single critical section.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<State>,
}

impl MemoryRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    #[instrument(skip_all, level = "debug")]
    async fn append(&self, record: NewRecord) -> Result<RecordId> {
        let mut state = self.write();
        let id = RecordId(state.records.len() as u64 + 1);
        state.records.push(record.into_record(id));
        Ok(id)
    }

    async fn get(&self, id: RecordId) -> Result<Option<Record>> {
        Ok(self.read().records.iter().find(|r| r.id == id).cloned())
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(&self, query: &RecordQuery) -> Result<RecordPage> {
        let state = self.read();
        let mut matching: Vec<&Record> =
            state.records.iter().filter(|r| query.matches(r)).collect();
        matching.sort_by(|a, b| query.compare(a, b));

        let items = matching
            .iter()
            .skip(query.offset() as usize)
            .take(query.limit() as usize)
            .map(|r| (*r).clone())
            .collect();

        Ok(RecordPage {
            items,
            total: matching.len() as u64,
            page: query.page(),
            limit: query.limit(),
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn promote(
        &self,
        id: RecordId,
        reason: Option<String>,
        category: Option<String>,
    ) -> Result<ExcellentRecord> {
        let mut state = self.write();
        let record = state
            .records
            .iter()
            .find(|r| r.id == id)
            .ok_or(Error::RecordNotFound(id))?;
        if record.status != Status::Completed {
            return Err(Error::NotPromotable {
                id,
                status: record.status,
            });
        }

        state.last_excellent_id += 1;
        let excellent = ExcellentRecord {
            id: ExcellentId(state.last_excellent_id),
            record_id: id,
            reason: reason.unwrap_or_else(|| DEFAULT_EXCELLENT_REASON.to_string()),
            category: category.unwrap_or_else(|| DEFAULT_EXCELLENT_CATEGORY.to_string()),
            created_at: Utc::now(),
        };
        state.excellent.push(excellent.clone());
        Ok(excellent)
    }

    #[instrument(skip(self), level = "debug")]
    async fn demote(&self, id: RecordId) -> Result<Vec<ExcellentRecord>> {
        let mut state = self.write();
        if !state.records.iter().any(|r| r.id == id) {
            return Err(Error::RecordNotFound(id));
        }
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut state.excellent)
            .into_iter()
            .partition(|e| e.record_id == id);
        state.excellent = kept;
        if removed.is_empty() {
            return Err(Error::NotExcellent(id));
        }
        Ok(removed)
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_excellent(
        &self,
        id: ExcellentId,
        update: ExcellentUpdate,
    ) -> Result<ExcellentRecord> {
        let mut state = self.write();
        let excellent = state
            .excellent
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or(Error::ExcellentNotFound(id))?;
        update.apply(excellent);
        Ok(excellent.clone())
    }

    async fn list_excellent(&self, query: &ExcellentQuery) -> Result<Vec<ExcellentEntry>> {
        let state = self.read();
        Ok(state
            .entries(query.category.as_deref())
            .take(query.limit() as usize)
            .collect())
    }

    async fn excellent_summary(&self) -> Result<ExcellentSummary> {
        let state = self.read();
        let entries: Vec<_> = state.entries(None).collect();
        Ok(summarize(&entries))
    }

    async fn excellent_categories(&self) -> Result<Vec<CategoryCount>> {
        let state = self.read();
        let mut counts = std::collections::BTreeMap::<&str, u64>::new();
        for excellent in &state.excellent {
            *counts.entry(excellent.category.as_str()).or_default() += 1;
        }
        Ok(counts
            .into_iter()
            .map(|(category, count)| CategoryCount {
                category: category.to_string(),
                count,
            })
            .collect())
    }

    async fn statistics(&self) -> Result<RecordStatistics> {
        let state = self.read();
        let since = Utc::now() - Duration::days(7);
        let mut stats = RecordStatistics::default();
        let (mut score_sum, mut scored) = (0.0, 0u64);

        for record in &state.records {
            stats.total_records += 1;
            match record.status {
                Status::Completed => stats.successful_records += 1,
                Status::Failed => stats.failed_records += 1,
                _ => {}
            }
            if let Some(score) = record.score {
                score_sum += score;
                scored += 1;
            }
            *stats
                .model_type_distribution
                .entry(record.model_type.to_string())
                .or_default() += 1;
            if record.created_at >= since {
                stats.recent_records += 1;
            }
        }
        stats.average_score = (scored > 0).then(|| score_sum / scored as f64);
        Ok(stats.with_rate())
    }

    async fn rankings(&self, dataset_name: &str, limit: usize) -> Result<Vec<Ranking>> {
        let state = self.read();
        let query = RecordQuery {
            dataset_name: Some(dataset_name.to_string()),
            status: Some(Status::Completed),
            sort: super::SortField::Score,
            ..Default::default()
        };
        let mut completed: Vec<&Record> =
            state.records.iter().filter(|r| query.matches(r)).collect();
        completed.sort_by(|a, b| query.compare(a, b));
        Ok(rank_best(completed, limit))
    }
}
