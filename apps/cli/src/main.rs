//! Topica CLI - variational EM training for LDA topic models
//!
//! Provides the `topica` command, which drives training and inference runs on
//! an external compute engine and manages their checkpoints.

mod commands;
mod config;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use commands::{merge, snapshots, train, InferCommand, MergeCommand, SnapshotsCommand, TrainCommand};

/// Topica - LDA topic model training on a distributed compute engine
#[derive(Parser, Debug)]
#[command(
    name = "topica",
    author,
    version,
    about = "Topica - variational EM training for LDA topic models",
    long_about = "Topica drives variational EM iterations on an external compute engine.\nEach iteration submits one job, re-estimates the Dirichlet prior and checkpoints the model so runs can be resumed."
)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Configuration file (overrides ./topica.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Engine executable (overrides `engine.command`)
    #[arg(long, global = true)]
    engine: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a topic model
    ///
    /// Runs EM iterations until the log-likelihood converges or the iteration
    /// limit is reached. Checkpoints are written to the output directory after
    /// every iteration.
    Train(TrainCommand),

    /// Score a corpus against a trained model
    Infer(InferCommand),

    /// Merge partition files into a single file
    Merge(MergeCommand),

    /// List the checkpoints of a training run
    Snapshots(SnapshotsCommand),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = config::load_config(args.config.as_deref(), args.engine)?;

    // Initialize tracing
    let level = match args.log_level.as_deref().or(config.log_level.as_deref()).unwrap_or("info") {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .without_time()
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match args.command {
        Command::Train(command) => train::execute(command, &config).await?,
        Command::Infer(command) => train::infer(command, &config).await?,
        Command::Merge(command) => merge::execute(command, &config).await?,
        Command::Snapshots(command) => snapshots::execute(command)?,
    }

    Ok(())
}
