//! Segmentation UQ CLI
//!
//! Command-line helpers around the evaluation pipeline: split manifests,
//! sliding-window grid inspection and config validation.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;
mod parser;

use commands::check::CheckConfigCommand;
use commands::grid::GridCommand;
use commands::split::SplitCommand;

#[derive(Parser)]
#[command(
    name = "uq-eval",
    version,
    about = "Patch pipeline and uncertainty evaluation for 3D segmentation",
    after_help = "EXAMPLES:\n  \
                  # Assign cases to a test set and cross-validation folds\n  \
                  uq-eval split ids.txt --config eval.yaml --output splits.json\n\n  \
                  # Inspect the inference tiling of a volume\n  \
                  uq-eval grid --shape 512x512x120 --patch 128x128x64 --step 64\n\n  \
                  # Validate a config before a long run\n  \
                  uq-eval check-config eval.yaml --resolved"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a deterministic train/test/fold manifest for a list of cases
    Split(SplitCommand),

    /// Show the sliding-window grid for a volume shape
    Grid(GridCommand),

    /// Load and validate an evaluation config
    CheckConfig(CheckConfigCommand),
}

fn main() -> Result<()> {
    // Thread count for case-level and sample-level parallelism
    if let Ok(threads_str) = std::env::var("UQ_EVAL_THREADS") {
        if let Ok(num_threads) = threads_str.parse::<usize>() {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .ok();
        }
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Split(cmd) => cmd.execute(),
        Commands::Grid(cmd) => cmd.execute(),
        Commands::CheckConfig(cmd) => cmd.execute(),
    }
}
