//! Host metrics read from procfs and `statvfs`.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{MonitorError, Result};
use crate::types::HostMetrics;

/// Aggregate jiffies from the `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuTimes {
    pub busy: u64,
    pub total: u64,
}

impl CpuTimes {
    /// Busy share between two readings; falls back to since-boot totals when
    /// there is no earlier reading or the counters did not move.
    #[must_use]
    pub fn percent_since(&self, previous: Option<CpuTimes>) -> f64 {
        let (busy, total) = match previous {
            Some(prev) if self.total > prev.total => (
                self.busy.saturating_sub(prev.busy),
                self.total - prev.total,
            ),
            _ => (self.busy, self.total),
        };
        if total == 0 {
            0.0
        } else {
            busy as f64 / total as f64 * 100.0
        }
    }
}

/// Reads host metrics, remembering the last CPU reading between calls so the
/// CPU figure reflects the interval since the previous sample.
pub struct HostSampler {
    proc_root: PathBuf,
    disk_path: PathBuf,
    last_cpu: Mutex<Option<CpuTimes>>,
}

impl HostSampler {
    pub fn new(proc_root: impl Into<PathBuf>, disk_path: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            disk_path: disk_path.into(),
            last_cpu: Mutex::new(None),
        }
    }

    pub async fn sample(&self) -> Result<HostMetrics> {
        let stat = read(&self.proc_root.join("stat")).await?;
        let meminfo = read(&self.proc_root.join("meminfo")).await?;
        let loadavg = read(&self.proc_root.join("loadavg")).await.ok();
        let uptime = read(&self.proc_root.join("uptime")).await.ok();

        let (cpu, cpu_count) = parse_stat(&stat)?;
        let previous = {
            let mut last = self
                .last_cpu
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            last.replace(cpu)
        };
        let cpu_percent = cpu.percent_since(previous);

        let (memory_total_bytes, memory_available_bytes) = parse_meminfo(&meminfo)?;
        let memory_used_bytes = memory_total_bytes.saturating_sub(memory_available_bytes);
        let memory_percent = if memory_total_bytes == 0 {
            0.0
        } else {
            memory_used_bytes as f64 / memory_total_bytes as f64 * 100.0
        };

        let disk_path = self.disk_path.clone();
        let disk = tokio::task::spawn_blocking(move || disk_usage(&disk_path))
            .await
            .ok()
            .flatten();

        Ok(HostMetrics {
            cpu_percent,
            cpu_count,
            memory_total_bytes,
            memory_used_bytes,
            memory_available_bytes,
            memory_percent,
            disk_total_bytes: disk.map(|d| d.total),
            disk_used_bytes: disk.map(|d| d.total - d.free),
            disk_free_bytes: disk.map(|d| d.free),
            disk_percent: disk.map(DiskUsage::percent),
            load_average: loadavg
                .as_deref()
                .and_then(parse_loadavg)
                .unwrap_or([0.0; 3]),
            uptime_secs: uptime.as_deref().and_then(parse_uptime),
        })
    }
}

impl Default for HostSampler {
    fn default() -> Self {
        Self::new("/proc", "/")
    }
}

async fn read(path: &Path) -> Result<String> {
    Ok(tokio::fs::read_to_string(path).await?)
}

/// Returns the aggregate CPU times and the number of per-core lines.
pub fn parse_stat(contents: &str) -> Result<(CpuTimes, usize)> {
    let mut aggregate = None;
    let mut cores = 0;

    for line in contents.lines() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("cpu") => {
                let values: Vec<u64> = parts.filter_map(|v| v.parse().ok()).collect();
                if values.len() < 4 {
                    return Err(MonitorError::Parse(format!("short cpu line: {line}")));
                }
                // user nice system idle iowait irq softirq steal
                let total: u64 = values.iter().take(8).sum();
                let idle = values[3] + values.get(4).copied().unwrap_or(0);
                aggregate = Some(CpuTimes {
                    busy: total.saturating_sub(idle),
                    total,
                });
            }
            Some(label) if label.starts_with("cpu") => cores += 1,
            _ => {}
        }
    }

    aggregate
        .map(|cpu| (cpu, cores.max(1)))
        .ok_or_else(|| MonitorError::Parse("no cpu line in stat".into()))
}

/// Returns `(MemTotal, MemAvailable)` in bytes.
pub fn parse_meminfo(contents: &str) -> Result<(u64, u64)> {
    let mut total = None;
    let mut available = None;
    let mut free = None;

    for line in contents.lines() {
        let Some((key, rest)) = line.split_once(':') else {
            continue;
        };
        let kib = rest
            .split_whitespace()
            .next()
            .and_then(|v| v.parse::<u64>().ok());
        match key {
            "MemTotal" => total = kib,
            "MemAvailable" => available = kib,
            "MemFree" => free = kib,
            _ => {}
        }
    }

    let total = total.ok_or_else(|| MonitorError::Parse("MemTotal missing".into()))?;
    let available = available.or(free).unwrap_or(0);
    Ok((total * 1024, available * 1024))
}

pub fn parse_loadavg(contents: &str) -> Option<[f64; 3]> {
    let mut parts = contents.split_whitespace().map(|v| v.parse::<f64>().ok());
    Some([parts.next()??, parts.next()??, parts.next()??])
}

pub fn parse_uptime(contents: &str) -> Option<f64> {
    contents.split_whitespace().next()?.parse().ok()
}

#[derive(Debug, Clone, Copy)]
struct DiskUsage {
    total: u64,
    free: u64,
}

impl DiskUsage {
    fn percent(self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.total - self.free) as f64 / self.total as f64 * 100.0
        }
    }
}

#[cfg(unix)]
fn disk_usage(path: &Path) -> Option<DiskUsage> {
    use std::ffi::CString;
    use std::os::unix::ffi::OsStrExt;

    let c_path = CString::new(path.as_os_str().as_bytes()).ok()?;
    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    // SAFETY: c_path is NUL-terminated and stat is a valid out-pointer.
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return None;
    }
    let block = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block;
    let free = (stat.f_bavail as u64 * block).min(total);
    Some(DiskUsage { total, free })
}

#[cfg(not(unix))]
fn disk_usage(_path: &Path) -> Option<DiskUsage> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const STAT: &str = "\
cpu  100 0 100 700 100 0 0 0 0 0
cpu0 50 0 50 350 50 0 0 0 0 0
cpu1 50 0 50 350 50 0 0 0 0 0
intr 12345
";

    const MEMINFO: &str = "\
MemTotal:       16000000 kB
MemFree:         2000000 kB
MemAvailable:    4000000 kB
";

    #[test]
    fn test_parse_stat_counts_cores() {
        let (cpu, cores) = parse_stat(STAT).unwrap();
        assert_eq!(cores, 2);
        assert_eq!(cpu.total, 1000);
        assert_eq!(cpu.busy, 200);
    }

    #[test]
    fn test_cpu_percent_uses_delta() {
        let before = CpuTimes {
            busy: 200,
            total: 1000,
        };
        let after = CpuTimes {
            busy: 250,
            total: 1100,
        };
        assert!((after.percent_since(Some(before)) - 50.0).abs() < f64::EPSILON);
        assert!((before.percent_since(None) - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_meminfo_prefers_available() {
        let (total, available) = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(total, 16_000_000 * 1024);
        assert_eq!(available, 4_000_000 * 1024);
    }

    #[test]
    fn test_parse_loadavg_and_uptime() {
        assert_eq!(
            parse_loadavg("0.50 1.25 2.00 1/234 5678\n"),
            Some([0.5, 1.25, 2.0])
        );
        assert_eq!(parse_uptime("3600.25 7000.00\n"), Some(3600.25));
        assert_eq!(parse_loadavg("garbage"), None);
    }

    #[tokio::test]
    async fn test_sampler_reads_fake_procfs() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("stat"), STAT).unwrap();
        std::fs::write(dir.path().join("meminfo"), MEMINFO).unwrap();
        std::fs::write(dir.path().join("loadavg"), "1.0 2.0 3.0 1/1 1").unwrap();

        let sampler = HostSampler::new(dir.path(), dir.path());
        let metrics = sampler.sample().await.unwrap();

        assert_eq!(metrics.cpu_count, 2);
        assert!((metrics.cpu_percent - 20.0).abs() < 1e-9);
        assert!((metrics.memory_percent - 75.0).abs() < 1e-9);
        assert_eq!(metrics.load_average, [1.0, 2.0, 3.0]);
        assert_eq!(metrics.uptime_secs, None);
    }

    #[tokio::test]
    async fn test_sampler_without_procfs_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let sampler = HostSampler::new(dir.path().join("missing"), dir.path());
        assert!(sampler.sample().await.is_err());
    }
}
