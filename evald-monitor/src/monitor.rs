//! The [`ResourceMonitor`] trait and its implementations.

use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{MonitorError, Result};
use crate::host::HostSampler;
use crate::nvidia;
use crate::types::{GpuStatus, HostStatus, NvidiaSmiReport, ResourceSnapshot};

/// Source of GPU and host readings.
///
/// `sample` never fails: a probe that errors or times out is reported as an
/// `Unavailable` half of the snapshot.
#[async_trait]
pub trait ResourceMonitor: Send + Sync {
    async fn sample(&self) -> ResourceSnapshot;

    /// Parsed devices plus the driver's raw text.
    async fn nvidia_smi(&self) -> Result<NvidiaSmiReport>;
}

#[async_trait]
impl<M: ResourceMonitor + ?Sized> ResourceMonitor for Arc<M> {
    async fn sample(&self) -> ResourceSnapshot {
        (**self).sample().await
    }

    async fn nvidia_smi(&self) -> Result<NvidiaSmiReport> {
        (**self).nvidia_smi().await
    }
}

/// Settings for [`SystemMonitor`].
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub nvidia_smi: PathBuf,
    pub timeout: Duration,
    pub proc_root: PathBuf,
    pub disk_path: PathBuf,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            nvidia_smi: PathBuf::from("nvidia-smi"),
            timeout: Duration::from_secs(3),
            proc_root: PathBuf::from("/proc"),
            disk_path: PathBuf::from("/"),
        }
    }
}

/// Probes the local machine.
pub struct SystemMonitor {
    config: MonitorConfig,
    host: HostSampler,
}

impl SystemMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        let host = HostSampler::new(&config.proc_root, &config.disk_path);
        Self { config, host }
    }

    async fn gpu_status(&self) -> GpuStatus {
        match nvidia::query(&self.config.nvidia_smi, self.config.timeout).await {
            Ok(report) => GpuStatus::Available {
                devices: report.devices,
            },
            Err(e) => {
                debug!(error = %e, "GPU probe failed");
                GpuStatus::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn host_status(&self) -> HostStatus {
        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(timeout, self.host.sample()).await {
            Ok(result) => result,
            Err(_) => Err(MonitorError::Timeout {
                program: self.config.proc_root.display().to_string(),
                timeout,
            }),
        };
        match result {
            Ok(metrics) => HostStatus::Available(metrics),
            Err(e) => {
                warn!(error = %e, "host probe failed");
                HostStatus::Unavailable {
                    reason: e.to_string(),
                }
            }
        }
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(MonitorConfig::default())
    }
}

#[async_trait]
impl ResourceMonitor for SystemMonitor {
    async fn sample(&self) -> ResourceSnapshot {
        let (gpu, host) = tokio::join!(self.gpu_status(), self.host_status());
        ResourceSnapshot::new(gpu, host)
    }

    async fn nvidia_smi(&self) -> Result<NvidiaSmiReport> {
        nvidia::query(&self.config.nvidia_smi, self.config.timeout).await
    }
}

/// Serves the last sample and the last driver report of an inner monitor
/// until each is `ttl` old.
///
/// Concurrent callers that miss the cache wait on the same probe. Failed
/// driver reports are not cached.
pub struct CachedMonitor<M> {
    inner: M,
    ttl: Duration,
    cached: Mutex<Option<(Instant, ResourceSnapshot)>>,
    report: Mutex<Option<(Instant, NvidiaSmiReport)>>,
}

impl<M: ResourceMonitor> CachedMonitor<M> {
    pub fn new(inner: M, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cached: Mutex::new(None),
            report: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<M: ResourceMonitor> ResourceMonitor for CachedMonitor<M> {
    async fn sample(&self) -> ResourceSnapshot {
        let mut cached = self.cached.lock().await;
        if let Some((at, snapshot)) = cached.as_ref()
            && at.elapsed() < self.ttl
        {
            return snapshot.clone();
        }
        let snapshot = self.inner.sample().await;
        *cached = Some((Instant::now(), snapshot.clone()));
        snapshot
    }

    async fn nvidia_smi(&self) -> Result<NvidiaSmiReport> {
        let mut cached = self.report.lock().await;
        if let Some((at, report)) = cached.as_ref()
            && at.elapsed() < self.ttl
        {
            return Ok(report.clone());
        }
        let report = self.inner.nvidia_smi().await?;
        *cached = Some((Instant::now(), report.clone()));
        Ok(report)
    }
}

/// Returns whatever snapshot it was last given.
pub struct StaticMonitor {
    snapshot: RwLock<ResourceSnapshot>,
}

impl StaticMonitor {
    pub fn new(gpu: GpuStatus, host: HostStatus) -> Self {
        Self {
            snapshot: RwLock::new(ResourceSnapshot::new(gpu, host)),
        }
    }

    /// A machine with no GPU and no host data.
    pub fn unavailable() -> Self {
        Self::new(
            GpuStatus::Unavailable {
                reason: "static monitor".into(),
            },
            HostStatus::Unavailable {
                reason: "static monitor".into(),
            },
        )
    }

    /// Replace the GPU half of the snapshot.
    pub fn set_gpu(&self, gpu: GpuStatus) {
        let mut snapshot = self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *snapshot = ResourceSnapshot::new(gpu, snapshot.host.clone());
    }

    fn current(&self) -> ResourceSnapshot {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ResourceMonitor for StaticMonitor {
    async fn sample(&self) -> ResourceSnapshot {
        self.current()
    }

    async fn nvidia_smi(&self) -> Result<NvidiaSmiReport> {
        match self.current().gpu {
            GpuStatus::Available { devices } => Ok(NvidiaSmiReport {
                raw_output: nvidia::render_csv(&devices),
                devices,
            }),
            GpuStatus::Unavailable { reason } => Err(MonitorError::Parse(reason)),
        }
    }
}
