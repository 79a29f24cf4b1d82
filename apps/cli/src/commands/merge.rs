//! `topica merge`: consolidate partition files into one.

use crate::commands::types::MergeCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use serde_json::json;
use std::sync::Arc;
use topica_core::{CommandEngine, TopicaConfig};
use topica_training::merger::{inspect_record_format, matched_files};
use topica_training::{MergeRequest, OutputMerger, RecordFormat};
use tracing::warn;

pub async fn execute(command: MergeCommand, config: &TopicaConfig) -> Result<()> {
    let parallelism = match command.mappers {
        Some(n) if n <= 0 => {
            warn!(mappers = n, "non-positive mapper count, merging locally");
            0
        }
        Some(n) => n,
        None => 0,
    };

    let format = if command.text {
        RecordFormat::Text
    } else {
        detect_format(&command.input)?
    };

    let merger = if parallelism > 0 {
        let engine = CommandEngine::from_config(&config.engine)
            .context("A parallel merge needs an engine; set `engine.command` or pass --engine")?;
        OutputMerger::with_engine(Arc::new(engine))
    } else {
        OutputMerger::local()
    };

    let request = MergeRequest {
        source_glob: command.input.clone(),
        destination: command.output,
        format,
        parallelism,
        delete_source: command.delete_source,
    };
    let merged = merger
        .merge(&request)
        .await
        .with_context(|| format!("Failed to merge {}", command.input))?;

    if command.json {
        let out = json!({
            "output": merged,
            "format": request.format,
            "strategy": if parallelism > 0 { "distributed" } else { "local" },
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("{} {}", "Merged into".green(), merged.display().to_string().cyan());
    Ok(())
}

/// Record format of the first matched partition; text when nothing matches yet.
fn detect_format(pattern: &str) -> Result<RecordFormat> {
    let files = matched_files(pattern).with_context(|| format!("Invalid input pattern {pattern}"))?;
    match files.first() {
        Some(first) => inspect_record_format(first)
            .with_context(|| format!("Failed to read {}", first.display())),
        None => Ok(RecordFormat::Text),
    }
}
