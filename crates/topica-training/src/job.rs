use crate::config::RunConfiguration;
use crate::layout::JobOutputs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const TOOL_NAME: &str = "VariationalInference";

/// One variational EM pass, rebuilt from the run configuration for every iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRequest {
    pub name: String,
    pub iteration: u32,
    pub corpus: PathBuf,
    pub alpha: PathBuf,
    /// Absent on the very first training iteration.
    pub beta: Option<PathBuf>,
    pub informed_prior: Option<PathBuf>,
    pub topics: u32,
    pub terms: u32,
    pub mappers: u32,
    pub reducers: u32,
    pub local_iterations: u32,
    pub training: bool,
    pub random_start_gamma: bool,
    pub direct_emit: bool,
    pub truncate_beta: bool,
    pub outputs: JobOutputs,
}

impl JobRequest {
    #[must_use]
    pub fn job_name(config: &RunConfiguration, iteration: u32) -> String {
        if config.mode.is_training() {
            format!("{TOOL_NAME} - Iteration {}", iteration + 1)
        } else {
            format!("{TOOL_NAME} - Test")
        }
    }

    /// Whether the engine is expected to write posterior partitions.
    #[must_use]
    pub fn emits_posteriors(&self) -> bool {
        !self.training || !self.random_start_gamma
    }
}

/// Aggregate counters reported by a finished job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct JobCounters {
    pub total_docs: u64,
    /// Summed over topics, so one vocabulary entry counts once per topic.
    pub total_terms: u64,
    /// Negated log-likelihood, multiplied by the fixed counter scale.
    pub log_likelihood: i64,
    pub config_time: u64,
    pub training_time: u64,
}

/// Single-stage identity projection used by the distributed merge strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityJobRequest {
    pub name: String,
    pub inputs: Vec<PathBuf>,
    /// Directory the single output partition `part-00000` is written to.
    pub output_dir: PathBuf,
    pub parallelism: u32,
    pub format: crate::merger::RecordFormat,
}

/// What one iteration observed, decoded from the job counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    pub index: u32,
    pub log_likelihood: f64,
    pub document_count: u64,
    pub term_count: u64,
    pub avg_config_time_ms: f64,
    pub avg_train_time_ms: f64,
}

impl IterationRecord {
    #[must_use]
    pub fn decode(index: u32, counters: &JobCounters, topics: u32, counter_scale: f64) -> Self {
        let document_count = counters.total_docs;
        let per_document = |total: u64| {
            if document_count == 0 { 0.0 } else { total as f64 / document_count as f64 }
        };
        Self {
            index,
            log_likelihood: -(counters.log_likelihood as f64) / counter_scale,
            document_count,
            term_count: counters.total_terms / u64::from(topics.max(1)),
            avg_config_time_ms: per_document(counters.config_time),
            avg_train_time_ms: per_document(counters.training_time),
        }
    }

    /// Relative change against the previous log-likelihood, if one exists.
    #[must_use]
    pub fn relative_change(&self, previous: f64) -> Option<f64> {
        if previous == 0.0 || !previous.is_finite() {
            return None;
        }
        Some(((self.log_likelihood - previous) / previous).abs())
    }
}
