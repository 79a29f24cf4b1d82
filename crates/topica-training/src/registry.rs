use crate::error::TrainingResult;
use crate::layout::{CheckpointKind, CheckpointLayout};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Checkpoints found for one iteration index in an output directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub iteration: u32,
    pub alpha: bool,
    pub beta: bool,
    pub gamma: bool,
}

impl SnapshotEntry {
    /// A training run can resume from this index. Runs that re-draw posteriors
    /// every iteration never write gamma and do not need it.
    #[must_use]
    pub fn is_resumable(&self, random_start_gamma: bool) -> bool {
        self.is_model() && (random_start_gamma || self.gamma)
    }

    /// An inference run can score against this index.
    #[must_use]
    pub fn is_model(&self) -> bool {
        self.alpha && (self.beta || self.iteration == 0)
    }
}

/// Discover snapshots by scanning `<dir>/{alpha,beta,gamma}-<i>`, ordered by iteration.
pub fn discover_snapshots(dir: &Path) -> TrainingResult<Vec<SnapshotEntry>> {
    let mut found: BTreeMap<u32, SnapshotEntry> = BTreeMap::new();

    let entries = match std::fs::read_dir(dir) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some((kind, iteration)) = name.to_str().and_then(CheckpointLayout::parse_checkpoint_name) else {
            continue;
        };
        let is_dir = entry.file_type()?.is_dir();
        let snapshot = found.entry(iteration).or_insert(SnapshotEntry { iteration, ..Default::default() });
        match kind {
            CheckpointKind::Alpha if !is_dir => snapshot.alpha = true,
            CheckpointKind::Beta if !is_dir => snapshot.beta = true,
            CheckpointKind::Gamma if is_dir => snapshot.gamma = true,
            _ => {}
        }
    }

    Ok(found.into_values().collect())
}

/// Highest iteration index a training run in the given gamma mode can resume from.
pub fn latest_resumable(dir: &Path, random_start_gamma: bool) -> TrainingResult<Option<u32>> {
    Ok(discover_snapshots(dir)?
        .into_iter()
        .filter(|s| s.is_resumable(random_start_gamma))
        .map(|s| s.iteration)
        .max())
}
