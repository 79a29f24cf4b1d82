use crate::error::TrainingResult;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const ALPHA: &str = "alpha";
pub const BETA: &str = "beta";
pub const GAMMA: &str = "gamma";
pub const INFORMED_PRIOR: &str = "eta";
pub const RUN_MANIFEST: &str = "run_manifest.json";
pub const SUFFICIENT_STATISTICS: &str = "part-00000";

/// Key and value type tags carried by beta partitions.
pub const BETA_KEY_TYPE: &str = "topic_term";
pub const BETA_VALUE_TYPE: &str = "term_weights";

/// Checkpoint naming inside a run's output directory.
///
/// ```text
/// <root>/alpha-<i>      per-topic concentrations
/// <root>/beta-<i>       consolidated topic-term weights
/// <root>/gamma-<i>/     per-document posterior partitions
/// <root>/eta            copied informed prior
/// <root>/temp-<uuid>/   working directory of one iteration
/// ```
#[derive(Debug, Clone)]
pub struct CheckpointLayout {
    root: PathBuf,
}

impl CheckpointLayout {
    #[must_use]
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn alpha_path(&self, iteration: u32) -> PathBuf {
        self.root.join(format!("{ALPHA}-{iteration}"))
    }

    #[must_use]
    pub fn beta_path(&self, iteration: u32) -> PathBuf {
        self.root.join(format!("{BETA}-{iteration}"))
    }

    #[must_use]
    pub fn gamma_dir(&self, iteration: u32) -> PathBuf {
        self.root.join(format!("{GAMMA}-{iteration}"))
    }

    #[must_use]
    pub fn informed_prior_path(&self) -> PathBuf {
        self.root.join(INFORMED_PRIOR)
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(RUN_MANIFEST)
    }

    /// Allocate a fresh, not yet existing working directory for one iteration.
    #[must_use]
    pub fn new_working_dir(&self) -> WorkingDir {
        WorkingDir { path: self.root.join(format!("temp-{}", Uuid::new_v4().simple())) }
    }

    /// Parse `alpha-7` style names back into their kind and iteration.
    #[must_use]
    pub fn parse_checkpoint_name(name: &str) -> Option<(CheckpointKind, u32)> {
        let (prefix, index) = name.rsplit_once('-')?;
        let kind = match prefix {
            ALPHA => CheckpointKind::Alpha,
            BETA => CheckpointKind::Beta,
            GAMMA => CheckpointKind::Gamma,
            _ => return None,
        };
        index.parse().ok().map(|i| (kind, i))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointKind {
    Alpha,
    Beta,
    Gamma,
}

/// Scratch directory a compute job writes its partitions into.
#[derive(Debug, Clone)]
pub struct WorkingDir {
    path: PathBuf,
}

impl WorkingDir {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names the engine must use for what it writes here.
    #[must_use]
    pub fn outputs(&self) -> JobOutputs {
        JobOutputs {
            dir: self.path.clone(),
            beta_prefix: format!("{BETA}-"),
            gamma_prefix: format!("{GAMMA}-"),
            sufficient_statistics: SUFFICIENT_STATISTICS.to_string(),
        }
    }

    #[must_use]
    pub fn beta_glob(&self) -> String {
        self.partition_glob(BETA)
    }

    #[must_use]
    pub fn gamma_glob(&self) -> String {
        self.partition_glob(GAMMA)
    }

    /// `<dir>/<name>-*` with the directory escaped, so `[`, `]`, `*` and `?` in it match literally.
    fn partition_glob(&self, name: &str) -> String {
        let dir = glob::Pattern::escape(&self.path.to_string_lossy());
        Path::new(&dir).join(format!("{name}-*")).to_string_lossy().into_owned()
    }

    #[must_use]
    pub fn sufficient_statistics_path(&self) -> PathBuf {
        self.path.join(SUFFICIENT_STATISTICS)
    }

    pub fn remove(&self) -> TrainingResult<()> {
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Where a compute job places its partitions, relative to `dir`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutputs {
    pub dir: PathBuf,
    pub beta_prefix: String,
    pub gamma_prefix: String,
    pub sufficient_statistics: String,
}
