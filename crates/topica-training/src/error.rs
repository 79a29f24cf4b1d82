use std::path::PathBuf;
use thiserror::Error;

pub type TrainingResult<T> = std::result::Result<T, TrainingError>;

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("invalid run configuration: {0}")]
    Configuration(String),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("merge destination already exists: {}", .0.display())]
    MergeCollision(PathBuf),

    #[error("numeric domain error: {0}")]
    NumericDomain(String),

    #[error("compute job failed: {0}")]
    JobExecution(String),

    #[error("invalid checkpoint {}: {message}", path.display())]
    InvalidCheckpoint { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TrainingError {
    pub(crate) fn invalid_checkpoint(path: &std::path::Path, message: impl Into<String>) -> Self {
        Self::InvalidCheckpoint { path: path.to_path_buf(), message: message.into() }
    }
}
