//! Summary report for a finished batch.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use evald_models::ModelType;
use serde::{Deserialize, Serialize};

use crate::task::{Run, Task};
use crate::types::{Metrics, Status, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub task_id: TaskId,
    pub task_name: String,
    pub status: Status,
    pub summary: ReportSummary,
    pub score_statistics: Option<ScoreStatistics>,
    pub execution_time_statistics: Option<ValueStatistics>,
    pub memory_usage_statistics: Option<ValueStatistics>,
    pub model_type_distribution: BTreeMap<String, usize>,
    pub rankings: Vec<ReportRanking>,
    pub performance_by_type: BTreeMap<String, TypePerformance>,
    pub failed_runs: Vec<FailedRun>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub dataset_name: String,
    pub total_models: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage, two decimals.
    pub success_rate: f64,
}

/// Score spread, four decimals. `std_dev` is the sample deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreStatistics {
    pub average: f64,
    pub max: f64,
    pub min: f64,
    pub std_dev: f64,
}

/// Spread of a resource measurement, two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueStatistics {
    pub average: f64,
    pub max: f64,
    pub min: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRanking {
    pub rank: usize,
    pub model_path: String,
    pub model_name: String,
    pub model_type: ModelType,
    pub score: f64,
    pub execution_time: Option<f64>,
    pub memory_usage: Option<f64>,
    pub metrics: Metrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypePerformance {
    pub count: usize,
    pub average_score: f64,
    pub average_execution_time: Option<f64>,
    pub average_memory_usage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedRun {
    pub model_path: String,
    pub model_name: String,
    pub error_message: Option<String>,
}

impl BatchReport {
    /// Build the report from a task's runs.
    #[must_use]
    pub fn from_task(task: &Task) -> Self {
        let successful: Vec<(&Run, f64)> = task
            .runs
            .iter()
            .filter(|r| r.status == Status::Completed)
            .filter_map(|r| r.score.map(|s| (r, s)))
            .collect();
        let failed: Vec<&Run> = task
            .runs
            .iter()
            .filter(|r| r.status == Status::Failed)
            .collect();

        let total = task.runs.len();
        let success_rate = if total == 0 {
            0.0
        } else {
            round(successful.len() as f64 / total as f64 * 100.0, 2)
        };

        let scores: Vec<f64> = successful.iter().map(|(_, s)| *s).collect();
        let times: Vec<f64> = successful
            .iter()
            .filter_map(|(r, _)| r.execution_time)
            .collect();
        let memory: Vec<f64> = successful
            .iter()
            .filter_map(|(r, _)| r.memory_usage)
            .collect();

        let mut model_type_distribution = BTreeMap::new();
        for run in &task.runs {
            *model_type_distribution
                .entry(run.model_type.to_string())
                .or_insert(0) += 1;
        }

        let mut ranked = successful.clone();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.index.cmp(&b.0.index)));
        let rankings = ranked
            .iter()
            .enumerate()
            .map(|(i, (run, score))| ReportRanking {
                rank: i + 1,
                model_path: run.model_path.clone(),
                model_name: run.model_name.clone(),
                model_type: run.model_type,
                score: *score,
                execution_time: run.execution_time,
                memory_usage: run.memory_usage,
                metrics: run.metrics.clone(),
            })
            .collect();

        let mut by_type: BTreeMap<String, Vec<(&Run, f64)>> = BTreeMap::new();
        for (run, score) in &successful {
            by_type
                .entry(run.model_type.to_string())
                .or_default()
                .push((run, *score));
        }
        let performance_by_type = by_type
            .into_iter()
            .map(|(model_type, runs)| {
                let scores: Vec<f64> = runs.iter().map(|(_, s)| *s).collect();
                let times: Vec<f64> = runs.iter().filter_map(|(r, _)| r.execution_time).collect();
                let memory: Vec<f64> = runs.iter().filter_map(|(r, _)| r.memory_usage).collect();
                let performance = TypePerformance {
                    count: runs.len(),
                    average_score: round(mean(&scores).unwrap_or(0.0), 4),
                    average_execution_time: mean(&times).map(|v| round(v, 2)),
                    average_memory_usage: mean(&memory).map(|v| round(v, 2)),
                };
                (model_type, performance)
            })
            .collect();

        Self {
            task_id: task.id,
            task_name: task.task_name.clone(),
            status: task.status,
            summary: ReportSummary {
                dataset_name: task.dataset_name.clone(),
                total_models: total,
                successful: successful.len(),
                failed: failed.len(),
                success_rate,
            },
            score_statistics: score_statistics(&scores),
            execution_time_statistics: value_statistics(&times),
            memory_usage_statistics: value_statistics(&memory),
            model_type_distribution,
            rankings,
            performance_by_type,
            failed_runs: failed
                .iter()
                .map(|r| FailedRun {
                    model_path: r.model_path.clone(),
                    model_name: r.model_name.clone(),
                    error_message: r.error_message.clone(),
                })
                .collect(),
            generated_at: Utc::now(),
        }
    }
}

fn round(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn mean(values: &[f64]) -> Option<f64> {
    (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
}

fn score_statistics(scores: &[f64]) -> Option<ScoreStatistics> {
    let average = mean(scores)?;
    let std_dev = if scores.len() > 1 {
        let variance = scores.iter().map(|s| (s - average).powi(2)).sum::<f64>()
            / (scores.len() - 1) as f64;
        variance.sqrt()
    } else {
        0.0
    };
    Some(ScoreStatistics {
        average: round(average, 4),
        max: round(scores.iter().copied().fold(f64::MIN, f64::max), 4),
        min: round(scores.iter().copied().fold(f64::MAX, f64::min), 4),
        std_dev: round(std_dev, 4),
    })
}

fn value_statistics(values: &[f64]) -> Option<ValueStatistics> {
    let average = mean(values)?;
    Some(ValueStatistics {
        average: round(average, 2),
        max: round(values.iter().copied().fold(f64::MIN, f64::max), 2),
        min: round(values.iter().copied().fold(f64::MAX, f64::min), 2),
    })
}
