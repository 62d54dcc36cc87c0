//! Threshold-based health verdict over a snapshot.

use crate::types::{GpuStatus, HealthLevel, HealthStatus, HostStatus};

pub const GPU_TEMPERATURE_LIMIT_C: f64 = 80.0;
pub const GPU_UTILIZATION_LIMIT: f64 = 90.0;
pub const GPU_MEMORY_LIMIT: f64 = 90.0;
pub const HOST_MEMORY_LIMIT: f64 = 90.0;
pub const HOST_CPU_LIMIT: f64 = 90.0;

/// Compare every device and the host against fixed limits.
///
/// Missing data on either side yields [`HealthLevel::Unknown`]; any breach
/// yields [`HealthLevel::Warning`] with one issue string per breach.
pub fn assess(gpu: &GpuStatus, host: &HostStatus) -> HealthStatus {
    let mut issues = Vec::new();
    let mut unknown = false;

    match gpu {
        GpuStatus::Available { devices } => {
            for device in devices {
                if let Some(temp) = device.temperature_c
                    && temp > GPU_TEMPERATURE_LIMIT_C
                {
                    issues.push(format!("GPU {} temperature high: {temp:.0}°C", device.index));
                }
                if let Some(util) = device.utilization_percent
                    && util > GPU_UTILIZATION_LIMIT
                {
                    issues.push(format!("GPU {} utilization high: {util:.0}%", device.index));
                }
                if let Some(mem) = device.memory_percent()
                    && mem > GPU_MEMORY_LIMIT
                {
                    issues.push(format!("GPU {} memory high: {mem:.1}%", device.index));
                }
            }
        }
        GpuStatus::Unavailable { reason } => {
            unknown = true;
            issues.push(format!("GPU status unavailable: {reason}"));
        }
    }

    match host {
        HostStatus::Available(metrics) => {
            if metrics.memory_percent > HOST_MEMORY_LIMIT {
                issues.push(format!(
                    "system memory high: {:.1}%",
                    metrics.memory_percent
                ));
            }
            if metrics.cpu_percent > HOST_CPU_LIMIT {
                issues.push(format!("CPU usage high: {:.1}%", metrics.cpu_percent));
            }
        }
        HostStatus::Unavailable { reason } => {
            unknown = true;
            issues.push(format!("host metrics unavailable: {reason}"));
        }
    }

    let status = if unknown {
        HealthLevel::Unknown
    } else if issues.is_empty() {
        HealthLevel::Healthy
    } else {
        HealthLevel::Warning
    };

    HealthStatus { status, issues }
}
