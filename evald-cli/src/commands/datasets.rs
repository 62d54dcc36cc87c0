//! Dataset catalog commands.

use anyhow::Result;
use clap::{Args, Subcommand};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets::UTF8_FULL_CONDENSED};
use evald_models::Dataset;

use crate::config::ConfigLoader;

#[derive(Args, Debug)]
pub struct DatasetsArgs {
    #[command(subcommand)]
    pub command: DatasetsCommands,
}

#[derive(Subcommand, Debug)]
pub enum DatasetsCommands {
    /// List built-in and local datasets
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Create an empty local dataset
    Create {
        name: String,

        /// Task family (e.g., text_generation, classification, qa)
        #[arg(long, default_value = "text_generation")]
        task: String,

        #[arg(long)]
        description: Option<String>,
    },
    /// Check a dataset and report its sample count
    Validate { name: String },
}

pub async fn run(args: DatasetsArgs) -> Result<()> {
    let config = ConfigLoader::load()?;
    let registry = super::registry(&config);
    registry.datasets.scan().await?;

    match args.command {
        DatasetsCommands::List { json } => {
            let datasets = registry.datasets.list();
            if json {
                println!("{}", serde_json::to_string_pretty(&datasets)?);
            } else {
                print_table(&datasets);
            }
        }
        DatasetsCommands::Create {
            name,
            task,
            description,
        } => {
            let dataset = registry.datasets.create(&name, &task, description).await?;
            let path = dataset
                .path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default();
            println!("Created dataset '{}' at {}", dataset.name, path);
        }
        DatasetsCommands::Validate { name } => {
            let dataset = registry.datasets.validate(&name).await?;
            println!("{}: {}", dataset.name, dataset.status.as_str());
            if let Some(samples) = dataset.samples {
                println!("  samples: {}", samples);
            }
            if let Some(error) = &dataset.error {
                println!("  error:   {}", error);
            }
        }
    }
    Ok(())
}

fn print_table(datasets: &[Dataset]) {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Name").fg(Color::Cyan),
        Cell::new("Task").fg(Color::Cyan),
        Cell::new("Source").fg(Color::Cyan),
        Cell::new("Samples").fg(Color::Cyan),
        Cell::new("Status").fg(Color::Cyan),
    ]);

    for dataset in datasets {
        let source = if dataset.builtin { "builtin" } else { "local" };
        table.add_row(vec![
            Cell::new(&dataset.name),
            Cell::new(&dataset.task),
            Cell::new(source),
            Cell::new(dataset.samples.map_or_else(|| "-".to_string(), |s| s.to_string())),
            Cell::new(dataset.status.as_str()),
        ]);
    }

    println!("{table}");
}
