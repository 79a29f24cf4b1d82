//! Configuration file support.
//!
//! Settings shared by every `topica` invocation: which engine executable to
//! drive, default parallelism and the numeric tunables of a run.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use topica_training::{EstimatorKind, NewtonSettings, RunConfiguration, RunMode};

/// Configuration file contents. Every field is optional so files can be layered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicaConfig {
    /// External compute engine
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub mappers: Option<u32>,

    #[serde(default)]
    pub reducers: Option<u32>,

    /// Default maximum number of EM iterations
    #[serde(default)]
    pub iterations: Option<u32>,

    /// Per-document iteration cap forwarded to the engine
    #[serde(default)]
    pub local_iterations: Option<u32>,

    #[serde(default)]
    pub estimator: Option<EstimatorKind>,

    /// Relative log-likelihood change below which training stops
    #[serde(default)]
    pub tolerance: Option<f64>,

    /// Fixed-point scale of the log-likelihood counter
    #[serde(default)]
    pub counter_scale: Option<f64>,

    #[serde(default)]
    pub newton: Option<NewtonSettings>,

    /// Log level
    #[serde(default)]
    pub log_level: Option<String>,
}

/// How to launch the engine executable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Kill a job that runs longer than this
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    NotFound(String),

    /// Failed to read configuration file.
    #[error("Failed to read configuration file: {0}")]
    ReadError(String),

    /// Failed to parse configuration file.
    #[error("Failed to parse configuration file: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

impl TopicaConfig {
    /// Load configuration from a TOML file.
    pub fn load_from_file(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadError(format!("{}: {}", path.display(), e)))?;

        let config: Self =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_to_file(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize: {}", e)))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::ReadError(format!("Failed to create directory: {}", e)))?;
        }

        std::fs::write(path, content).map_err(|e| ConfigError::ReadError(format!("Failed to write file: {}", e)))?;

        Ok(())
    }

    /// `~/.topica/config.toml`
    pub fn default_global_path() -> PathBuf {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".topica")
            .join("config.toml")
    }

    pub fn default_local_path() -> PathBuf {
        PathBuf::from("topica.toml")
    }

    /// Load the global then the local file; local values win.
    ///
    /// A missing file is skipped. A file that exists but cannot be parsed is an error.
    pub fn discover_and_load() -> ConfigResult<Self> {
        Self::load_layers(&[Self::default_global_path(), Self::default_local_path()])
    }

    /// Load `paths` in order, each overriding the ones before it.
    pub fn load_layers(paths: &[PathBuf]) -> ConfigResult<Self> {
        let mut config = Self::default();
        for path in paths {
            match Self::load_from_file(path) {
                Ok(layer) => config.merge(&layer),
                Err(ConfigError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(config)
    }

    /// Merge another configuration into this one.
    ///
    /// Values from `other` override values in `self` if they are Some.
    pub fn merge(&mut self, other: &Self) {
        if other.engine.command.is_some() {
            self.engine.command.clone_from(&other.engine.command);
            self.engine.args.clone_from(&other.engine.args);
        }
        if other.engine.timeout_secs.is_some() {
            self.engine.timeout_secs = other.engine.timeout_secs;
        }
        self.mappers = other.mappers.or(self.mappers);
        self.reducers = other.reducers.or(self.reducers);
        self.iterations = other.iterations.or(self.iterations);
        self.local_iterations = other.local_iterations.or(self.local_iterations);
        self.estimator = other.estimator.or(self.estimator);
        self.tolerance = other.tolerance.or(self.tolerance);
        self.counter_scale = other.counter_scale.or(self.counter_scale);
        self.newton = other.newton.or(self.newton);
        if let Some(ref log_level) = other.log_level {
            self.log_level = Some(log_level.clone());
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.command.as_deref().is_some_and(|c| c.trim().is_empty()) {
            return Err(ConfigError::InvalidValue("engine.command must not be empty".to_string()));
        }
        if self.engine.timeout_secs == Some(0) {
            return Err(ConfigError::InvalidValue("engine.timeout_secs must be > 0".to_string()));
        }
        if self.tolerance.is_some_and(|t| !t.is_finite() || t < 0.0) {
            return Err(ConfigError::InvalidValue("tolerance must be >= 0".to_string()));
        }
        if self.counter_scale.is_some_and(|s| !s.is_finite() || s <= 0.0) {
            return Err(ConfigError::InvalidValue("counter_scale must be > 0".to_string()));
        }
        if let Some(newton) = &self.newton {
            newton.validate().map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        }
        Ok(())
    }

    /// Fill the tunables of `run` that the file sets. Command-line flags are applied afterwards.
    pub fn apply_to(&self, run: &mut RunConfiguration) {
        if let Some(mappers) = self.mappers {
            run.mappers = mappers;
        }
        if let Some(reducers) = self.reducers {
            run.reducers = reducers;
        }
        if let (Some(n), RunMode::Training { iterations, .. }) = (self.iterations, &mut run.mode) {
            *iterations = n;
        }
        if let Some(local_iterations) = self.local_iterations {
            run.local_iterations = local_iterations;
        }
        if let Some(estimator) = self.estimator {
            run.estimator = estimator;
        }
        if let Some(tolerance) = self.tolerance {
            run.convergence.tolerance = tolerance;
        }
        if let Some(scale) = self.counter_scale {
            run.convergence.counter_scale = scale;
        }
        if let Some(newton) = self.newton {
            run.newton = newton;
        }
    }
}
