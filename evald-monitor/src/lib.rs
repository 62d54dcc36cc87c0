//! evald-monitor - GPU and host resource sampling
//!
//! Readings come from `nvidia-smi` and procfs. Every probe is bounded by a
//! timeout; a probe that cannot answer marks its half of the snapshot
//! unavailable rather than failing the caller.

pub mod error;
pub mod health;
pub mod host;
mod monitor;
pub mod nvidia;
mod types;

pub use error::{MonitorError, Result};
pub use health::assess;
pub use monitor::{CachedMonitor, MonitorConfig, ResourceMonitor, StaticMonitor, SystemMonitor};
pub use types::{
    GpuDevice, GpuStatus, HealthLevel, HealthStatus, HostMetrics, HostStatus, NvidiaSmiReport,
    ResourceSnapshot,
};
