//! `topica train` and `topica infer`.

use crate::commands::require_engine;
use crate::commands::types::{CorpusArgs, InferCommand, SnapshotArg, TrainCommand};
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::path::Path;
use topica_core::TopicaConfig;
use topica_training::{
    discover_snapshots, latest_resumable, RunConfiguration, RunMode, SnapshotEntry, TerminalState,
    TracingProgressSink, TrainingOrchestrator, TrainingReport,
};

pub async fn execute(command: TrainCommand, config: &TopicaConfig) -> Result<()> {
    let resume_from = match command.resume {
        None => None,
        Some(SnapshotArg::Index(i)) => Some(i),
        Some(SnapshotArg::Latest) => Some(
            latest_resumable(&command.corpus.output, command.random_start_gamma)
                .context("Failed to scan output directory for snapshots")?
                .with_context(|| {
                    format!("No resumable snapshot in {}", command.corpus.output.display())
                })?,
        ),
    };

    let mut run = base_configuration(&command.corpus, config);
    if let RunMode::Training { iterations, resume_from: resume } = &mut run.mode {
        if let Some(n) = command.iterations {
            *iterations = n;
        }
        *resume = resume_from;
    }
    if let Some(reducers) = command.reducers {
        run.reducers = reducers;
    }
    if let Some(estimator) = command.estimator {
        run.estimator = estimator.into();
    }
    if let Some(tolerance) = command.tolerance {
        run.convergence.tolerance = tolerance;
    }
    run.random_start_gamma = command.random_start_gamma;
    run.truncate_beta = command.truncate_beta;
    run.local_merge = command.local_merge;
    run.informed_prior = command.informed_prior;

    let engine = require_engine(config)?;
    let mut orchestrator = TrainingOrchestrator::new(run, engine).context("Invalid training configuration")?;
    if let Some(seed) = command.seed {
        orchestrator = orchestrator.with_seed(seed);
    }

    let report = orchestrator.run(&TracingProgressSink).await.context("Training run failed")?;
    print_report(&report, command.corpus.json)
}

pub async fn infer(command: InferCommand, config: &TopicaConfig) -> Result<()> {
    let snapshot = match command.snapshot {
        SnapshotArg::Index(i) => i,
        SnapshotArg::Latest => latest_model(&command.model)?,
    };

    let mut run = base_configuration(&command.corpus, config);
    run.mode = RunMode::Inference { model_dir: command.model, snapshot };

    let engine = require_engine(config)?;
    let orchestrator = TrainingOrchestrator::new(run, engine).context("Invalid inference configuration")?;
    let report = orchestrator.run(&TracingProgressSink).await.context("Inference run failed")?;
    print_report(&report, command.corpus.json)
}

/// Configuration file values first, then the flags shared by both commands.
fn base_configuration(args: &CorpusArgs, config: &TopicaConfig) -> RunConfiguration {
    let mut run = RunConfiguration::training(args.input.clone(), args.output.clone(), args.topics, args.terms);
    config.apply_to(&mut run);
    if let Some(mappers) = args.mappers {
        run.mappers = mappers;
    }
    if let Some(local_iterations) = args.local_iterations {
        run.local_iterations = local_iterations;
    }
    run.direct_emit = args.direct_emit;
    run
}

fn latest_model(dir: &Path) -> Result<u32> {
    discover_snapshots(dir)
        .context("Failed to scan model directory for snapshots")?
        .into_iter()
        .filter(SnapshotEntry::is_model)
        .map(|s| s.iteration)
        .max()
        .with_context(|| format!("No model snapshot in {}", dir.display()))
}

fn print_report(report: &TrainingReport, json_output: bool) -> Result<()> {
    if json_output {
        let out = json!({
            "run_id": report.run_id,
            "state": report.state,
            "checkpoint": report.checkpoint,
            "manifest": report.manifest,
            "iterations": report.iterations,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let headline = match report.state {
        TerminalState::Converged => "Training converged".bold().green(),
        TerminalState::MaxIterationsReached => "Training reached the iteration limit".bold().yellow(),
        TerminalState::InferenceDone => "Inference complete".bold().green(),
    };

    println!();
    println!("{}", headline);
    println!("  Run: {}", report.run_id.cyan());
    println!();
    println!("{:<6} {:>20} {:>10} {:>10} {:>12}", "Iter", "Log-likelihood", "Docs", "Terms", "Train ms/doc");
    println!("{}", "─".repeat(62));
    for record in &report.iterations {
        println!(
            "{:<6} {:>20.6} {:>10} {:>10} {:>12.3}",
            record.index, record.log_likelihood, record.document_count, record.term_count, record.avg_train_time_ms
        );
    }
    println!();
    if report.state != TerminalState::InferenceDone {
        println!("  Snapshot: {}", report.checkpoint.to_string().cyan());
    }
    println!("  Manifest: {}", report.manifest.display().to_string().dimmed());
    println!();
    Ok(())
}
