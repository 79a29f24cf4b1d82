//! Command implementations for the Topica CLI.

pub mod merge;
pub mod snapshots;
pub mod train;
pub mod types;

pub use types::{InferCommand, MergeCommand, SnapshotsCommand, TrainCommand};

use anyhow::{Context, Result};
use std::sync::Arc;
use topica_core::{CommandEngine, TopicaConfig};
use topica_training::ComputeEngine;

/// The configured compute engine. Training and inference cannot run without one.
pub fn require_engine(config: &TopicaConfig) -> Result<Arc<dyn ComputeEngine>> {
    let engine = CommandEngine::from_config(&config.engine)
        .context("No compute engine configured; set `engine.command` in topica.toml or pass --engine")?;
    Ok(Arc::new(engine))
}
