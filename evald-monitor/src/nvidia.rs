//! `nvidia-smi` probing.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::debug;

use crate::error::{MonitorError, Result};
use crate::types::{GpuDevice, NvidiaSmiReport};

const QUERY_FIELDS: &str = "index,name,uuid,utilization.gpu,memory.used,memory.total,temperature.gpu,power.draw,power.limit";

/// Run `nvidia-smi` once and parse every device it lists.
///
/// The child is killed if it outlives `timeout`.
pub async fn query(program: &Path, timeout: Duration) -> Result<NvidiaSmiReport> {
    let program_name = program.display().to_string();
    let child = Command::new(program)
        .arg(format!("--query-gpu={QUERY_FIELDS}"))
        .arg("--format=csv,noheader,nounits")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| MonitorError::Spawn {
            program: program_name.clone(),
            source,
        })?;

    let output = tokio::time::timeout(timeout, child.wait_with_output())
        .await
        .map_err(|_| MonitorError::Timeout {
            program: program_name.clone(),
            timeout,
        })??;

    if !output.status.success() {
        return Err(MonitorError::CommandFailed {
            program: program_name,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let raw_output = String::from_utf8_lossy(&output.stdout).into_owned();
    let devices = parse_devices(&raw_output)?;
    debug!(count = devices.len(), "nvidia-smi reported devices");

    Ok(NvidiaSmiReport {
        devices,
        raw_output,
    })
}

/// Parse `--format=csv,noheader,nounits` output in [`QUERY_FIELDS`] order.
pub fn parse_devices(raw: &str) -> Result<Vec<GpuDevice>> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(parse_line)
        .collect()
}

fn parse_line(line: &str) -> Result<GpuDevice> {
    let fields: Vec<&str> = line.split(',').map(str::trim).collect();
    if fields.len() < 6 {
        return Err(MonitorError::Parse(format!(
            "expected at least 6 fields, got {}: {line}",
            fields.len()
        )));
    }

    let index = fields[0]
        .parse()
        .map_err(|_| MonitorError::Parse(format!("invalid GPU index: {}", fields[0])))?;

    Ok(GpuDevice {
        index,
        name: fields[1].to_string(),
        uuid: field(&fields, 2),
        utilization_percent: field(&fields, 3),
        memory_used_mb: field::<f64>(&fields, 4).map(|mb| mb as u64),
        memory_total_mb: field::<f64>(&fields, 5).map(|mb| mb as u64),
        temperature_c: field(&fields, 6),
        power_draw_w: field(&fields, 7),
        power_limit_w: field(&fields, 8),
    })
}

/// Fields the driver cannot report come back as `[N/A]` or `[Not Supported]`.
fn field<T: std::str::FromStr>(fields: &[&str], idx: usize) -> Option<T> {
    let value = fields.get(idx)?;
    if value.is_empty() || value.starts_with('[') || *value == "N/A" {
        return None;
    }
    value.parse().ok()
}

/// Render devices back into the driver's CSV layout.
pub fn render_csv(devices: &[GpuDevice]) -> String {
    fn opt<T: ToString>(value: &Option<T>) -> String {
        value
            .as_ref()
            .map_or_else(|| "[N/A]".to_string(), ToString::to_string)
    }

    devices
        .iter()
        .map(|d| {
            format!(
                "{}, {}, {}, {}, {}, {}, {}, {}, {}\n",
                d.index,
                d.name,
                opt(&d.uuid),
                opt(&d.utilization_percent),
                opt(&d.memory_used_mb),
                opt(&d.memory_total_mb),
                opt(&d.temperature_c),
                opt(&d.power_draw_w),
                opt(&d.power_limit_w),
            )
        })
        .collect()
}
