//! libSQL implementation of record storage.
//!
//! Records live in an embedded SQLite file opened through libSQL. All access
//! goes through one connection guarded by an async mutex, which also makes
//! the check-then-insert in [`RecordStore::promote`] atomic.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, SubsecRound, Utc};
use evald_models::ModelType;
use libsql::params::Params;
use libsql::{Builder, Connection, Database, Value};
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use super::{
    Error, ExcellentQuery, ExcellentUpdate, RecordPage, RecordQuery, RecordStore, Result,
    SortField, summarize,
};
use crate::record::{
    CategoryCount, DEFAULT_EXCELLENT_CATEGORY, DEFAULT_EXCELLENT_REASON, ExcellentEntry,
    ExcellentRecord, ExcellentSummary, NewRecord, Ranking, Record, RecordStatistics, rank_best,
};
use crate::types::{ExcellentId, Metrics, RecordId, Status};

/// SQL schema for the records table.
const SCHEMA_RECORDS: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_id TEXT NOT NULL,
    model_name TEXT NOT NULL,
    model_path TEXT NOT NULL,
    dataset_name TEXT NOT NULL,
    model_type TEXT NOT NULL,
    status TEXT NOT NULL,
    score REAL,
    execution_time REAL,
    memory_usage REAL,
    metrics TEXT NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL
)
"#;

/// SQL schema for the excellent records table.
const SCHEMA_EXCELLENT: &str = r#"
CREATE TABLE IF NOT EXISTS excellent_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    record_id INTEGER NOT NULL REFERENCES records(id),
    reason TEXT NOT NULL,
    category TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

const INDEX_RECORDS_DATASET: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_dataset_score
ON records(dataset_name, score)
"#;

const INDEX_RECORDS_CREATED: &str = r#"
CREATE INDEX IF NOT EXISTS idx_records_created
ON records(created_at)
"#;

const RECORD_COLUMNS: &str = "id, task_id, model_name, model_path, dataset_name, model_type, status, score, execution_time, memory_usage, metrics, error_message, created_at";

const EXCELLENT_COLUMNS: &str = "e.id, e.record_id, e.reason, e.category, e.created_at";

/// Unqualified excellent columns, for `RETURNING` clauses.
const EXCELLENT_RETURNING: &str = "id, record_id, reason, category, created_at";

/// libSQL-backed record store.
pub struct LibsqlRecordStore {
    _db: Database,
    conn: Mutex<Connection>,
}

impl LibsqlRecordStore {
    /// Open (or create) a store in a local database file.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let db = Builder::new_local(path).build().await?;
        Self::with_database(db).await
    }

    /// Open a store that lives only as long as this value.
    pub async fn open_in_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:").build().await?;
        Self::with_database(db).await
    }

    async fn with_database(db: Database) -> Result<Self> {
        let conn = db.connect()?;
        conn.execute(SCHEMA_RECORDS, ()).await?;
        conn.execute(SCHEMA_EXCELLENT, ()).await?;
        conn.execute(INDEX_RECORDS_DATASET, ()).await?;
        conn.execute(INDEX_RECORDS_CREATED, ()).await?;
        Ok(Self {
            _db: db,
            conn: Mutex::new(conn),
        })
    }

    /// Parse a record from a row selected with [`RECORD_COLUMNS`] at `offset`.
    fn parse_record(row: &libsql::Row, offset: i32) -> Result<Record> {
        let id: i64 = row.get(offset)?;
        let task_id_str: String = row.get(offset + 1)?;
        let model_name: String = row.get(offset + 2)?;
        let model_path: String = row.get(offset + 3)?;
        let dataset_name: String = row.get(offset + 4)?;
        let model_type_str: String = row.get(offset + 5)?;
        let status_str: String = row.get(offset + 6)?;
        let score: Option<f64> = row.get(offset + 7)?;
        let execution_time: Option<f64> = row.get(offset + 8)?;
        let memory_usage: Option<f64> = row.get(offset + 9)?;
        let metrics_json: String = row.get(offset + 10)?;
        let error_message: Option<String> = row.get(offset + 11)?;
        let created_at_str: String = row.get(offset + 12)?;

        let task_id = task_id_str
            .parse()
            .map_err(|_| Error::InvalidData(format!("invalid task id: {task_id_str}")))?;
        let model_type = ModelType::parse(&model_type_str)
            .ok_or_else(|| Error::InvalidData(format!("invalid model type: {model_type_str}")))?;
        let status = Status::parse(&status_str)
            .ok_or_else(|| Error::InvalidData(format!("invalid status: {status_str}")))?;
        let metrics: Metrics = serde_json::from_str(&metrics_json)?;

        Ok(Record {
            id: RecordId(id as u64),
            task_id,
            model_name,
            model_path,
            dataset_name,
            model_type,
            status,
            score,
            execution_time,
            memory_usage,
            metrics,
            error_message,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    fn parse_excellent(row: &libsql::Row) -> Result<ExcellentRecord> {
        let id: i64 = row.get(0)?;
        let record_id: i64 = row.get(1)?;
        let reason: String = row.get(2)?;
        let category: String = row.get(3)?;
        let created_at_str: String = row.get(4)?;

        Ok(ExcellentRecord {
            id: ExcellentId(id as u64),
            record_id: RecordId(record_id as u64),
            reason,
            category,
            created_at: parse_datetime(&created_at_str)?,
        })
    }

    /// Markers joined to their records, newest first.
    async fn fetch_excellent(
        conn: &Connection,
        category: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<ExcellentEntry>> {
        let record_columns = RECORD_COLUMNS
            .split(", ")
            .map(|c| format!("r.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut params = Vec::new();
        let mut sql = format!(
            "SELECT {EXCELLENT_COLUMNS}, {record_columns} FROM excellent_records e JOIN records r ON r.id = e.record_id"
        );
        if let Some(category) = category {
            sql.push_str(" WHERE e.category = ?");
            params.push(Value::Text(category.to_string()));
        }
        sql.push_str(" ORDER BY e.id DESC");
        if let Some(limit) = limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
        }

        let mut rows = conn.query(&sql, Params::Positional(params)).await?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await? {
            entries.push(ExcellentEntry {
                excellent: Self::parse_excellent(&row)?,
                record: Self::parse_record(&row, 5)?,
            });
        }
        Ok(entries)
    }

    async fn fetch_record(conn: &Connection, id: RecordId) -> Result<Option<Record>> {
        let mut rows = conn
            .query(
                &format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?"),
                [id.0 as i64],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(Self::parse_record(&row, 0)?)),
            None => Ok(None),
        }
    }
}

/// Build a `WHERE` clause and its positional parameters for a query.
fn where_clause(query: &RecordQuery) -> (String, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut params = Vec::new();

    if let Some(task_id) = query.task_id {
        conditions.push("task_id = ?");
        params.push(Value::Text(task_id.to_string()));
    }
    if let Some(name) = &query.model_name {
        conditions.push("instr(lower(model_name), lower(?)) > 0");
        params.push(Value::Text(name.clone()));
    }
    if let Some(dataset) = &query.dataset_name {
        conditions.push("dataset_name = ?");
        params.push(Value::Text(dataset.clone()));
    }
    if let Some(status) = query.status {
        conditions.push("status = ?");
        params.push(Value::Text(status.as_str().to_string()));
    }
    if let Some(model_type) = query.model_type {
        conditions.push("model_type = ?");
        params.push(Value::Text(model_type.as_str().to_string()));
    }
    if let Some(min) = query.min_score {
        conditions.push("score >= ?");
        params.push(Value::Real(min));
    }
    if let Some(max) = query.max_score {
        conditions.push("score <= ?");
        params.push(Value::Real(max));
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, params)
}

#[async_trait]
impl RecordStore for LibsqlRecordStore {
    #[instrument(skip_all, level = "debug")]
    async fn append(&self, record: NewRecord) -> Result<RecordId> {
        let metrics_json = serde_json::to_string(&record.metrics)?;
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "INSERT INTO records (task_id, model_name, model_path, dataset_name, model_type, status, score, execution_time, memory_usage, metrics, error_message, created_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
                libsql::params![
                    record.task_id.to_string(),
                    record.model_name,
                    record.model_path,
                    record.dataset_name,
                    record.model_type.as_str(),
                    record.status.as_str(),
                    record.score,
                    record.execution_time,
                    record.memory_usage,
                    metrics_json,
                    record.error_message,
                    format_datetime(record.created_at)
                ],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::InvalidData("insert returned no id".to_string()))?;
        let id: i64 = row.get(0)?;
        debug!(record_id = id, "appended record");
        Ok(RecordId(id as u64))
    }

    #[instrument(skip(self), level = "debug")]
    async fn get(&self, id: RecordId) -> Result<Option<Record>> {
        let conn = self.conn.lock().await;
        Self::fetch_record(&conn, id).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn list(&self, query: &RecordQuery) -> Result<RecordPage> {
        let (clause, params) = where_clause(query);
        let conn = self.conn.lock().await;

        let mut rows = conn
            .query(
                &format!("SELECT COUNT(*) FROM records{clause}"),
                Params::Positional(params.clone()),
            )
            .await?;
        let total: i64 = match rows.next().await? {
            Some(row) => row.get(0)?,
            None => 0,
        };

        let mut page_params = params;
        page_params.push(Value::Integer(i64::from(query.limit())));
        page_params.push(Value::Integer(query.offset() as i64));
        let direction = query.order.keyword();
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM records{clause} ORDER BY {} {direction}, id {direction} LIMIT ? OFFSET ?",
            query.sort.column(),
        );
        let mut rows = conn.query(&sql, Params::Positional(page_params)).await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::parse_record(&row, 0)?);
        }

        Ok(RecordPage {
            items,
            total: total as u64,
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
        let conn = self.conn.lock().await;
        let record = Self::fetch_record(&conn, id)
            .await?
            .ok_or(Error::RecordNotFound(id))?;
        if record.status != Status::Completed {
            return Err(Error::NotPromotable {
                id,
                status: record.status,
            });
        }

        let reason = reason.unwrap_or_else(|| DEFAULT_EXCELLENT_REASON.to_string());
        let category = category.unwrap_or_else(|| DEFAULT_EXCELLENT_CATEGORY.to_string());
        let created_at = Utc::now().trunc_subsecs(6);
        let mut rows = conn
            .query(
                "INSERT INTO excellent_records (record_id, reason, category, created_at) VALUES (?, ?, ?, ?) RETURNING id",
                libsql::params![
                    id.0 as i64,
                    reason.clone(),
                    category.clone(),
                    format_datetime(created_at)
                ],
            )
            .await?;
        let row = rows
            .next()
            .await?
            .ok_or_else(|| Error::InvalidData("insert returned no id".to_string()))?;
        let excellent_id: i64 = row.get(0)?;

        Ok(ExcellentRecord {
            id: ExcellentId(excellent_id as u64),
            record_id: id,
            reason,
            category,
            created_at,
        })
    }

    #[instrument(skip(self), level = "debug")]
    async fn demote(&self, id: RecordId) -> Result<Vec<ExcellentRecord>> {
        let conn = self.conn.lock().await;
        if Self::fetch_record(&conn, id).await?.is_none() {
            return Err(Error::RecordNotFound(id));
        }
        let mut rows = conn
            .query(
                &format!(
                    "DELETE FROM excellent_records WHERE record_id = ? RETURNING {EXCELLENT_RETURNING}"
                ),
                [id.0 as i64],
            )
            .await?;
        let mut removed = Vec::new();
        while let Some(row) = rows.next().await? {
            removed.push(Self::parse_excellent(&row)?);
        }
        if removed.is_empty() {
            return Err(Error::NotExcellent(id));
        }
        removed.sort_by_key(|e| e.id);
        debug!(record_id = %id, removed = removed.len(), "removed excellent markers");
        Ok(removed)
    }

    #[instrument(skip(self), level = "debug")]
    async fn update_excellent(
        &self,
        id: ExcellentId,
        update: ExcellentUpdate,
    ) -> Result<ExcellentRecord> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    "UPDATE excellent_records SET reason = COALESCE(?, reason), category = COALESCE(?, category) WHERE id = ? RETURNING {EXCELLENT_RETURNING}"
                ),
                libsql::params![update.reason, update.category, id.0 as i64],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Self::parse_excellent(&row),
            None => Err(Error::ExcellentNotFound(id)),
        }
    }

    #[instrument(skip(self), level = "debug")]
    async fn list_excellent(&self, query: &ExcellentQuery) -> Result<Vec<ExcellentEntry>> {
        let conn = self.conn.lock().await;
        Self::fetch_excellent(&conn, query.category.as_deref(), Some(query.limit())).await
    }

    #[instrument(skip(self), level = "debug")]
    async fn excellent_summary(&self) -> Result<ExcellentSummary> {
        let conn = self.conn.lock().await;
        let entries = Self::fetch_excellent(&conn, None, None).await?;
        Ok(summarize(&entries))
    }

    #[instrument(skip(self), level = "debug")]
    async fn excellent_categories(&self) -> Result<Vec<CategoryCount>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                "SELECT category, COUNT(*) FROM excellent_records GROUP BY category ORDER BY category",
                (),
            )
            .await?;
        let mut categories = Vec::new();
        while let Some(row) = rows.next().await? {
            let category: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            categories.push(CategoryCount {
                category,
                count: count as u64,
            });
        }
        Ok(categories)
    }

    #[instrument(skip(self), level = "debug")]
    async fn statistics(&self) -> Result<RecordStatistics> {
        let conn = self.conn.lock().await;
        let mut stats = RecordStatistics::default();

        let mut rows = conn
            .query(
                "SELECT COUNT(*), SUM(status = 'completed'), SUM(status = 'failed'), AVG(score) FROM records",
                (),
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let total: i64 = row.get(0)?;
            let successful: Option<i64> = row.get(1)?;
            let failed: Option<i64> = row.get(2)?;
            stats.total_records = total as u64;
            stats.successful_records = successful.unwrap_or(0) as u64;
            stats.failed_records = failed.unwrap_or(0) as u64;
            stats.average_score = row.get(3)?;
        }

        let mut rows = conn
            .query(
                "SELECT model_type, COUNT(*) FROM records GROUP BY model_type",
                (),
            )
            .await?;
        while let Some(row) = rows.next().await? {
            let model_type: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            stats
                .model_type_distribution
                .insert(model_type, count as u64);
        }

        let since = format_datetime(Utc::now() - Duration::days(7));
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM records WHERE created_at >= ?",
                [since],
            )
            .await?;
        if let Some(row) = rows.next().await? {
            let recent: i64 = row.get(0)?;
            stats.recent_records = recent as u64;
        }

        Ok(stats.with_rate())
    }

    #[instrument(skip(self), level = "debug")]
    async fn rankings(&self, dataset_name: &str, limit: usize) -> Result<Vec<Ranking>> {
        let conn = self.conn.lock().await;
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE dataset_name = ? AND status = ? AND score IS NOT NULL ORDER BY {} DESC, id DESC",
                    SortField::Score.column()
                ),
                libsql::params![dataset_name, Status::Completed.as_str()],
            )
            .await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            records.push(Self::parse_record(&row, 0)?);
        }
        Ok(rank_best(&records, limit))
    }
}

/// Format a datetime for storage.
///
/// Fixed-width UTC so that string comparison in SQL matches time order.
fn format_datetime(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a datetime from storage.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| Error::InvalidData(format!("invalid datetime: {s}")))
}
