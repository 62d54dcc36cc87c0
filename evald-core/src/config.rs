//! Orchestrator tuning knobs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Scheduling and admission settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Runs allowed to execute at once across all tasks.
    pub max_concurrent_runs: usize,
    /// Explicit GPU memory budget in MB; `0` derives it from the monitor.
    pub gpu_memory_ceiling_mb: u32,
    /// Share of detected GPU memory used when no ceiling is configured.
    pub gpu_memory_fraction: f64,
    /// Budget used when no GPU is visible.
    pub fallback_gpu_memory_mb: u32,
    /// Memory a run claims unless its config sets `memory_estimate_mb`.
    pub run_memory_estimate_mb: u32,
    /// Hold admitted runs while live GPU utilization is at the ceiling.
    pub gpu_gating: bool,
    pub gpu_utilization_ceiling: f64,
    pub admission_poll_ms: u64,
    /// Seconds a run may wait before it is flagged as resource-delayed.
    pub resource_wait_warn_secs: u64,
    /// Per-run harness timeout; `0` disables it.
    pub harness_timeout_secs: u64,
    /// Finished tasks kept on the progress board before the oldest are
    /// dropped. Records are unaffected.
    pub retained_tasks: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_runs: 2,
            gpu_memory_ceiling_mb: 0,
            gpu_memory_fraction: 0.9,
            fallback_gpu_memory_mb: 16_384,
            run_memory_estimate_mb: 4_096,
            gpu_gating: true,
            gpu_utilization_ceiling: 95.0,
            admission_poll_ms: 500,
            resource_wait_warn_secs: 30,
            harness_timeout_secs: 0,
            retained_tasks: 1_000,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn admission_poll(&self) -> Duration {
        Duration::from_millis(self.admission_poll_ms.max(1))
    }

    #[must_use]
    pub fn resource_wait_warn(&self) -> Duration {
        Duration::from_secs(self.resource_wait_warn_secs)
    }

    #[must_use]
    pub fn harness_timeout(&self) -> Option<Duration> {
        (self.harness_timeout_secs > 0).then(|| Duration::from_secs(self.harness_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_config_keeps_defaults() {
        let config: OrchestratorConfig = serde_json::from_value(serde_json::json!({
            "max_concurrent_runs": 8,
            "harness_timeout_secs": 600
        }))
        .unwrap();

        assert_eq!(config.max_concurrent_runs, 8);
        assert_eq!(config.harness_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(config.run_memory_estimate_mb, 4_096);
        assert!(config.gpu_gating);
    }

    #[test]
    fn zero_timeout_disables_it() {
        assert_eq!(OrchestratorConfig::default().harness_timeout(), None);
    }
}
