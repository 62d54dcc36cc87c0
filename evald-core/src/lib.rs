//! Evaluation job orchestration for evald.
//!
//! This crate provides:
//! - [`Orchestrator`]: accepts single and batch evaluations and drives them
//! - [`TaskBoard`]: consistent task snapshots for pollers and subscribers
//! - [`AdmissionController`]: executor slots and GPU memory gating
//! - [`RecordStore`]: append-only evaluation records and excellent markers
//! - [`Harness`]: the pluggable evaluator each run calls
//!
//! # Lifecycle
//!
//! ```text
//! pending ──► running ──► completed
//!    │           │
//!    └───────────┴──────► failed
//! ```
//!
//! Tasks and runs only ever move forward. A batch task completes once every
//! run is terminal, even when some runs failed, unless it was submitted with
//! `fail_fast` or cancelled.

mod error;

pub mod admission;
pub mod config;
pub mod harness;
pub mod orchestrator;
pub mod progress;
pub mod record;
pub mod report;
pub mod storage;
pub mod task;
pub mod types;

pub use admission::{AdmissionController, MEMORY_ESTIMATE_KEY, QueueStatus, RunPermit};
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use harness::{
    CommandHarness, EvalOutcome, EvalRequest, Harness, HarnessError, SimulatedHarness,
};
pub use orchestrator::{BatchRequest, Orchestrator};
pub use progress::{TaskBoard, TaskCounts};
pub use record::{
    CategoryCount, ExcellentEntry, ExcellentRecord, ExcellentSummary, NewRecord, Ranking, Record,
    RecordStatistics,
};
pub use report::BatchReport;
pub use storage::{
    ExcellentQuery, ExcellentUpdate, LibsqlRecordStore, MemoryRecordStore, RecordPage,
    RecordQuery, RecordStore, SortField, SortOrder,
};
pub use task::{Run, Task, TaskProjection};
pub use types::{ExcellentId, Metrics, RecordId, RunConfig, Status, TaskId, TaskKind};
