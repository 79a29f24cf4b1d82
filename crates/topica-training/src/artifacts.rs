use crate::config::RunMode;
use crate::error::{TrainingError, TrainingResult};
use crate::job::IterationRecord;
use crate::layout::CheckpointKind;
use crate::orchestrator::TerminalState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointArtifact {
    pub kind: CheckpointKind,
    pub iteration: u32,
    pub path: PathBuf,
    /// Absent for directory checkpoints.
    #[serde(default)]
    pub sha256: Option<String>,
}

/// Summary written next to the checkpoints when a run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub mode: RunMode,
    pub topics: u32,
    pub terms: u32,
    pub state: TerminalState,
    pub iterations: Vec<IterationRecord>,
    pub artifacts: Vec<CheckpointArtifact>,
}

impl RunManifest {
    pub fn write(&self, path: &Path) -> TrainingResult<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read(path: &Path) -> TrainingResult<Self> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

pub fn sha256_file(path: &Path) -> TrainingResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn make_artifact(kind: CheckpointKind, iteration: u32, path: PathBuf) -> TrainingResult<CheckpointArtifact> {
    if !path.exists() {
        return Err(TrainingError::Precondition(format!(
            "checkpoint does not exist: {}",
            path.display()
        )));
    }

    let sha256 = if path.is_file() { Some(sha256_file(&path)?) } else { None };
    Ok(CheckpointArtifact { kind, iteration, path, sha256 })
}
