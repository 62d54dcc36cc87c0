//! Snapshot types produced by a [`ResourceMonitor`](crate::ResourceMonitor).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One GPU as reported by the driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpuDevice {
    pub index: u32,
    pub name: String,
    pub uuid: Option<String>,
    pub utilization_percent: Option<f64>,
    pub memory_used_mb: Option<u64>,
    pub memory_total_mb: Option<u64>,
    pub temperature_c: Option<f64>,
    pub power_draw_w: Option<f64>,
    pub power_limit_w: Option<f64>,
}

impl GpuDevice {
    /// Memory in use as a percentage of the device total.
    #[must_use]
    pub fn memory_percent(&self) -> Option<f64> {
        match (self.memory_used_mb, self.memory_total_mb) {
            (Some(used), Some(total)) if total > 0 => Some(used as f64 / total as f64 * 100.0),
            _ => None,
        }
    }

    /// Memory not in use, in MB.
    #[must_use]
    pub fn memory_free_mb(&self) -> Option<u64> {
        match (self.memory_used_mb, self.memory_total_mb) {
            (Some(used), Some(total)) => Some(total.saturating_sub(used)),
            _ => None,
        }
    }
}

/// GPU side of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GpuStatus {
    Available { devices: Vec<GpuDevice> },
    Unavailable { reason: String },
}

impl GpuStatus {
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available { .. })
    }

    #[must_use]
    pub fn devices(&self) -> &[GpuDevice] {
        match self {
            Self::Available { devices } => devices,
            Self::Unavailable { .. } => &[],
        }
    }

    /// Sum of device memory across all visible GPUs.
    #[must_use]
    pub fn total_memory_mb(&self) -> Option<u64> {
        let total: u64 = self
            .devices()
            .iter()
            .filter_map(|d| d.memory_total_mb)
            .sum();
        (total > 0).then_some(total)
    }

    /// Highest utilization across devices; `None` when nothing reports it.
    #[must_use]
    pub fn max_utilization_percent(&self) -> Option<f64> {
        self.devices()
            .iter()
            .filter_map(|d| d.utilization_percent)
            .reduce(f64::max)
    }

    /// Highest memory pressure across devices.
    #[must_use]
    pub fn max_memory_percent(&self) -> Option<f64> {
        self.devices()
            .iter()
            .filter_map(GpuDevice::memory_percent)
            .reduce(f64::max)
    }
}

/// Host CPU, memory and disk figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostMetrics {
    pub cpu_percent: f64,
    pub cpu_count: usize,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_available_bytes: u64,
    pub memory_percent: f64,
    pub disk_total_bytes: Option<u64>,
    pub disk_used_bytes: Option<u64>,
    pub disk_free_bytes: Option<u64>,
    pub disk_percent: Option<f64>,
    pub load_average: [f64; 3],
    pub uptime_secs: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum HostStatus {
    Available(HostMetrics),
    Unavailable { reason: String },
}

impl HostStatus {
    #[must_use]
    pub fn metrics(&self) -> Option<&HostMetrics> {
        match self {
            Self::Available(metrics) => Some(metrics),
            Self::Unavailable { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Healthy,
    Warning,
    Unknown,
}

impl HealthLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Unknown => "unknown",
        }
    }
}

/// Overall verdict plus the individual threshold breaches behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: HealthLevel,
    pub issues: Vec<String>,
}

/// Everything one sampling pass learned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub gpu: GpuStatus,
    pub host: HostStatus,
    pub health: HealthStatus,
    pub sampled_at: DateTime<Utc>,
}

impl ResourceSnapshot {
    /// Build a snapshot and derive its health from the parts.
    #[must_use]
    pub fn new(gpu: GpuStatus, host: HostStatus) -> Self {
        let health = crate::health::assess(&gpu, &host);
        Self {
            gpu,
            host,
            health,
            sampled_at: Utc::now(),
        }
    }
}

/// Parsed devices together with the driver's raw text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NvidiaSmiReport {
    pub devices: Vec<GpuDevice>,
    pub raw_output: String,
}
