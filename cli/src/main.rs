//! CLI for loadfold
//!
//! Operator commands around the aggregator:
//! - seed: create the aggregate table and its zero rows
//! - averages: print buckets with their average load
//! - simulate: generate a feed of synthetic readings

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod commands;
mod output;

#[derive(Parser)]
#[command(name = "loadfold")]
#[command(about = "loadfold - per-plug load averages by weekday and time slice", long_about = None)]
#[command(version)]
struct Cli {
    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the aggregate table and insert zero rows for every bucket
    Seed(commands::seed::SeedArgs),

    /// Print aggregate rows with their average load
    Averages(commands::averages::AveragesArgs),

    /// Write synthetic event batches to stdout as JSON lines
    Simulate(commands::simulate::SimulateArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Seed(args) => commands::seed::run(args).await,
        Commands::Averages(args) => commands::averages::run(args).await,
        Commands::Simulate(args) => commands::simulate::run(args),
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}
