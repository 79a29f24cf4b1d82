//! Topica core: the concrete engine backend and configuration file layer used by the `topica` binary.

pub mod config;
pub mod engines;

pub use config::{ConfigError, ConfigResult, EngineConfig, TopicaConfig};
pub use engines::CommandEngine;
