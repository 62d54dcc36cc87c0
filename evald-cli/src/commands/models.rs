//! Model catalog commands.
//!
//! Scans the configured models directory the same way the server does at
//! startup and prints what it found.

use anyhow::{Result, bail};
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evald_models::{Model, ScanReport};

use crate::config::ConfigLoader;

/// Models arguments.
#[derive(Args, Debug)]
pub struct ModelsArgs {
    #[command(subcommand)]
    pub command: ModelsCommands,
}

/// Models subcommands.
#[derive(Subcommand, Debug)]
pub enum ModelsCommands {
    /// Scan the models directory and list every checkpoint
    #[command(alias = "scan")]
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show detailed model information
    Info {
        /// Model name or directory
        model: String,
    },
}

/// Run models command.
pub async fn run(args: ModelsArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let registry = super::registry(&config);
    let report = registry.models.scan().await?;

    match args.command {
        ModelsCommands::List { json } if json => {
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        ModelsCommands::List { .. } => {
            list_models(&report, &config.registry.models_dir.display().to_string());
            Ok(())
        }
        ModelsCommands::Info { model } => {
            let Ok(model) = registry.models.get(&model) else {
                bail!("Model not found: {}", model);
            };
            print_model(&model);
            Ok(())
        }
    }
}

fn list_models(report: &ScanReport, models_dir: &str) {
    if report.models.is_empty() {
        println!("No models found in {}", models_dir);
        return;
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Type").fg(Color::Cyan),
        Cell::new("Parameters").fg(Color::Cyan),
        Cell::new("Format").fg(Color::Cyan),
        Cell::new("Size").fg(Color::Cyan),
    ]);

    for model in &report.models {
        table.add_row(vec![
            Cell::new(&model.name),
            Cell::new(model.model_type.as_str()),
            Cell::new(model.parameters.map_or_else(|| "-".to_string(), format_parameters)),
            Cell::new(model.format.as_deref().unwrap_or("-")),
            Cell::new(format_bytes(model.size_bytes)),
        ]);
    }

    println!("{table}");
    println!("\nTotal: {} models", report.total);
    for skipped in &report.skipped {
        println!("Skipped: {}", skipped);
    }
}

fn print_model(model: &Model) {
    println!("Name:        {}", model.name);
    println!("Path:        {}", model.path);
    println!("Type:        {}", model.model_type);
    println!(
        "Parameters:  {}",
        model.parameters.map_or_else(|| "unknown".to_string(), format_parameters)
    );
    println!("Format:      {}", model.format.as_deref().unwrap_or("unknown"));
    println!("Size:        {} ({} files)", format_bytes(model.size_bytes), model.file_count);
    println!("Config:      {}", yes_no(model.has_config));
    println!("Tokenizer:   {}", yes_no(model.has_tokenizer));
    if let Some(modified) = model.modified_at {
        println!("Modified:    {}", modified.format("%Y-%m-%d %H:%M:%S UTC"));
    }
}

fn yes_no(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}

/// Format a parameter count (e.g., 7_000_000_000 -> "7.0B").
fn format_parameters(count: u64) -> String {
    if count >= 1_000_000_000 {
        format!("{:.1}B", count as f64 / 1e9)
    } else if count >= 1_000_000 {
        format!("{:.1}M", count as f64 / 1e6)
    } else if count >= 1_000 {
        format!("{:.1}K", count as f64 / 1e3)
    } else {
        count.to_string()
    }
}

/// Format a byte count with binary units.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_parameters() {
        assert_eq!(format_parameters(7_000_000_000), "7.0B");
        assert_eq!(format_parameters(110_000_000), "110.0M");
        assert_eq!(format_parameters(4_500), "4.5K");
        assert_eq!(format_parameters(12), "12");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024 * 1024), "3.0 GiB");
    }
}
