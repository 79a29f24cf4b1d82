use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_ITERATIONS: u32 = 40;
pub const DEFAULT_MAPPERS: u32 = 10;
pub const DEFAULT_REDUCERS: u32 = 1;
pub const DEFAULT_LOCAL_ITERATIONS: u32 = 10;

/// Whether the run fits a model or scores held-out documents against one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunMode {
    Training {
        iterations: u32,
        /// Snapshot index to continue from. `None` starts from a random alpha.
        #[serde(default)]
        resume_from: Option<u32>,
    },
    Inference {
        /// Output directory of the training run that produced the model.
        model_dir: PathBuf,
        snapshot: u32,
    },
}

impl RunMode {
    #[must_use]
    pub fn is_training(&self) -> bool {
        matches!(self, Self::Training { .. })
    }

    /// Index of the first iteration this run executes.
    #[must_use]
    pub fn first_iteration(&self) -> u32 {
        match self {
            Self::Training { resume_from, .. } => resume_from.unwrap_or(0),
            Self::Inference { snapshot, .. } => *snapshot,
        }
    }
}

/// Which alpha update strategy the estimator uses.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimatorKind {
    /// Asymmetric prior, one concentration per topic.
    #[default]
    Vector,
    /// Legacy symmetric prior sharing a single concentration.
    Scalar,
}

/// Tunables of the Newton-Raphson alpha update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_iterations: u32,
    pub threshold: f64,
    pub decay_factor: f64,
    pub max_decay: u32,
    /// Scalar strategy only: restart multiplier after a non-finite iterate.
    pub scale_factor: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self { max_iterations: 1000, threshold: 1e-6, decay_factor: 0.8, max_decay: 10, scale_factor: 10.0 }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> TrainingResult<()> {
        if self.max_iterations == 0 {
            return Err(TrainingError::Configuration("newton.max_iterations must be >= 1".to_string()));
        }
        if !self.threshold.is_finite() || self.threshold <= 0.0 {
            return Err(TrainingError::Configuration("newton.threshold must be > 0".to_string()));
        }
        if !(self.decay_factor > 0.0 && self.decay_factor < 1.0) {
            return Err(TrainingError::Configuration("newton.decay_factor must be in (0, 1)".to_string()));
        }
        if !self.scale_factor.is_finite() || self.scale_factor <= 0.0 {
            return Err(TrainingError::Configuration("newton.scale_factor must be > 0".to_string()));
        }
        Ok(())
    }
}

/// Global convergence and counter decoding.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvergenceSettings {
    /// Relative log-likelihood change at or below which training stops.
    pub tolerance: f64,
    /// Fixed-point scale the engine applies to the log-likelihood counter.
    pub counter_scale: f64,
}

impl Default for ConvergenceSettings {
    fn default() -> Self {
        Self { tolerance: 1e-6, counter_scale: 1e6 }
    }
}

/// Immutable parameters of one training or inference run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfiguration {
    pub input: PathBuf,
    pub output: PathBuf,
    pub topics: u32,
    pub terms: u32,
    pub mappers: u32,
    pub reducers: u32,
    pub mode: RunMode,
    #[serde(default)]
    pub random_start_gamma: bool,
    #[serde(default)]
    pub direct_emit: bool,
    #[serde(default)]
    pub truncate_beta: bool,
    #[serde(default)]
    pub local_merge: bool,
    #[serde(default)]
    pub informed_prior: Option<PathBuf>,
    #[serde(default = "default_local_iterations")]
    pub local_iterations: u32,
    #[serde(default)]
    pub estimator: EstimatorKind,
    #[serde(default)]
    pub newton: NewtonSettings,
    #[serde(default)]
    pub convergence: ConvergenceSettings,
}

fn default_local_iterations() -> u32 {
    DEFAULT_LOCAL_ITERATIONS
}

impl RunConfiguration {
    /// A training configuration with default tunables.
    #[must_use]
    pub fn training(input: PathBuf, output: PathBuf, topics: u32, terms: u32) -> Self {
        Self {
            input,
            output,
            topics,
            terms,
            mappers: DEFAULT_MAPPERS,
            reducers: DEFAULT_REDUCERS,
            mode: RunMode::Training { iterations: DEFAULT_ITERATIONS, resume_from: None },
            random_start_gamma: false,
            direct_emit: false,
            truncate_beta: false,
            local_merge: false,
            informed_prior: None,
            local_iterations: DEFAULT_LOCAL_ITERATIONS,
            estimator: EstimatorKind::Vector,
            newton: NewtonSettings::default(),
            convergence: ConvergenceSettings::default(),
        }
    }

    /// Clear the options that only apply to training when running inference.
    #[must_use]
    pub fn normalize(mut self) -> Self {
        if self.mode.is_training() {
            return self;
        }
        if self.random_start_gamma {
            warn!("random_start_gamma ignored in inference mode");
            self.random_start_gamma = false;
        }
        if self.truncate_beta {
            warn!("truncate_beta ignored in inference mode");
            self.truncate_beta = false;
        }
        if self.informed_prior.take().is_some() {
            warn!("informed_prior ignored in inference mode");
        }
        if self.local_merge {
            warn!("local_merge ignored in inference mode");
            self.local_merge = false;
        }
        self.reducers = 0;
        self
    }

    pub fn validate(&self) -> TrainingResult<()> {
        if self.input.as_os_str().is_empty() {
            return Err(TrainingError::Configuration("input path is required".to_string()));
        }
        if self.output.as_os_str().is_empty() {
            return Err(TrainingError::Configuration("output path is required".to_string()));
        }
        if self.topics == 0 {
            return Err(TrainingError::Configuration("topics must be >= 1".to_string()));
        }
        if self.terms == 0 {
            return Err(TrainingError::Configuration("terms must be >= 1".to_string()));
        }
        if self.mappers == 0 {
            return Err(TrainingError::Configuration("mappers must be >= 1".to_string()));
        }
        if self.local_iterations == 0 {
            return Err(TrainingError::Configuration("local_iterations must be >= 1".to_string()));
        }
        match &self.mode {
            RunMode::Training { iterations, resume_from } => {
                if *iterations == 0 {
                    return Err(TrainingError::Configuration("iterations must be >= 1".to_string()));
                }
                if self.reducers == 0 {
                    return Err(TrainingError::Configuration("reducers must be >= 1".to_string()));
                }
                if let Some(resume) = resume_from {
                    if resume >= iterations {
                        return Err(TrainingError::Configuration(format!(
                            "resume snapshot {resume} must be strictly less than iterations {iterations}"
                        )));
                    }
                }
            }
            RunMode::Inference { model_dir, .. } => {
                if model_dir.as_os_str().is_empty() {
                    return Err(TrainingError::Configuration(
                        "inference mode requires a model directory".to_string(),
                    ));
                }
            }
        }
        if !self.convergence.tolerance.is_finite() || self.convergence.tolerance < 0.0 {
            return Err(TrainingError::Configuration("convergence.tolerance must be >= 0".to_string()));
        }
        if !self.convergence.counter_scale.is_finite() || self.convergence.counter_scale <= 0.0 {
            return Err(TrainingError::Configuration("convergence.counter_scale must be > 0".to_string()));
        }
        self.newton.validate()
    }

    /// Number of partitions the beta merge reads in parallel. Zero selects the local strategy.
    #[must_use]
    pub fn merge_parallelism(&self) -> i32 {
        if self.local_merge {
            0
        } else {
            i32::try_from(self.reducers).unwrap_or(i32::MAX)
        }
    }
}
