//! One-shot resource readings.

use anyhow::Result;
use clap::Args;
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evald_monitor::{GpuStatus, HostStatus, ResourceMonitor, ResourceSnapshot};

use super::models::format_bytes;
use crate::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct MonitorArgs {
    /// Print JSON instead of tables
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: MonitorArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let snapshot = super::system_monitor(&config).sample().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        print_snapshot(&snapshot);
    }
    Ok(())
}

fn print_snapshot(snapshot: &ResourceSnapshot) {
    match &snapshot.gpu {
        GpuStatus::Available { devices } => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec![
                Cell::new("GPU").fg(Color::Cyan),
                Cell::new("Name").fg(Color::Cyan),
                Cell::new("Util").fg(Color::Cyan),
                Cell::new("Memory").fg(Color::Cyan),
                Cell::new("Temp").fg(Color::Cyan),
            ]);
            for device in devices {
                let memory = match (device.memory_used_mb, device.memory_total_mb) {
                    (Some(used), Some(total)) => format!("{} / {} MB", used, total),
                    _ => "-".to_string(),
                };
                table.add_row(vec![
                    Cell::new(device.index),
                    Cell::new(&device.name),
                    Cell::new(percent(device.utilization_percent)),
                    Cell::new(memory),
                    Cell::new(
                        device
                            .temperature_c
                            .map_or_else(|| "-".to_string(), |t| format!("{t:.0}°C")),
                    ),
                ]);
            }
            println!("{table}");
        }
        GpuStatus::Unavailable { reason } => println!("GPU:    unavailable ({})", reason),
    }

    match &snapshot.host {
        HostStatus::Available(host) => {
            println!("CPU:    {:.1}% of {} cores", host.cpu_percent, host.cpu_count);
            println!(
                "Memory: {} / {} ({:.1}%)",
                format_bytes(host.memory_used_bytes),
                format_bytes(host.memory_total_bytes),
                host.memory_percent
            );
            if let (Some(used), Some(total)) = (host.disk_used_bytes, host.disk_total_bytes) {
                println!(
                    "Disk:   {} / {} ({})",
                    format_bytes(used),
                    format_bytes(total),
                    percent(host.disk_percent)
                );
            }
            let [one, five, fifteen] = host.load_average;
            println!("Load:   {:.2} {:.2} {:.2}", one, five, fifteen);
        }
        HostStatus::Unavailable { reason } => println!("Host:   unavailable ({})", reason),
    }

    println!("Health: {}", snapshot.health.status.as_str());
    for issue in &snapshot.health.issues {
        println!("  - {}", issue);
    }
}

fn percent(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.1}%"))
}
