//! `topica snapshots`: list the checkpoints of a training run.

use crate::commands::types::SnapshotsCommand;
use anyhow::{Context, Result};
use colored::Colorize;
use topica_training::discover_snapshots;

pub fn execute(command: SnapshotsCommand) -> Result<()> {
    let snapshots = discover_snapshots(&command.dir)
        .with_context(|| format!("Failed to scan {}", command.dir.display()))?;

    if command.json {
        println!("{}", serde_json::to_string_pretty(&snapshots)?);
        return Ok(());
    }

    println!();
    println!("{}", format!("Snapshots ({})", snapshots.len()).bold().cyan());
    println!();

    if snapshots.is_empty() {
        println!("  {}", format!("No checkpoints found in {}.", command.dir.display()).dimmed());
        return Ok(());
    }

    let mark = |present: bool| if present { "yes".green() } else { "-".dimmed() };
    println!("{:<6} {:<6} {:<6} {:<6} {}", "Iter", "Alpha", "Beta", "Gamma", "Usable for");
    println!("{}", "─".repeat(64));
    for s in snapshots {
        let usable = match (s.is_resumable(false), s.is_model()) {
            (true, _) => "resume, inference",
            (false, true) => "random-start resume, inference",
            (false, false) => "",
        };
        println!(
            "{:<6} {:<6} {:<6} {:<6} {}",
            s.iteration,
            mark(s.alpha),
            mark(s.beta),
            mark(s.gamma),
            usable
        );
    }
    println!();
    Ok(())
}
