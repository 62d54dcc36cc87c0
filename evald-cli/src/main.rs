use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "evald", about = "Model evaluation job orchestrator")]
#[command(version, propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage configuration
    Config(commands::config::ConfigArgs),
    /// Inspect the dataset catalog
    Datasets(commands::datasets::DatasetsArgs),
    /// Inspect the model catalog
    Models(commands::models::ModelsArgs),
    /// Sample GPU and host resources once
    Monitor(commands::monitor::MonitorArgs),
    /// Run the evald server
    Serve(commands::serve::ServeArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over the verbosity flag
    let default = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // Logs go to stderr so `--json` output stays parseable
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Config(args) => commands::config::run(args),
        Commands::Datasets(args) => commands::datasets::run(args).await,
        Commands::Models(args) => commands::models::run(args).await,
        Commands::Monitor(args) => commands::monitor::run(args).await,
        Commands::Serve(args) => commands::serve::run(args).await,
    }
}
