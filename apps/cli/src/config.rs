//! CLI configuration loading and merging.

use anyhow::{Context, Result};
use std::path::Path;
use topica_core::TopicaConfig;

/// Load and merge configuration.
///
/// Configuration precedence:
/// 1. CLI arguments (handled by clap)
/// 2. Local config file (./topica.toml), or the file given with --config
/// 3. Global config file (~/.topica/config.toml)
/// 4. Defaults
pub fn load_config(explicit: Option<&Path>, engine: Option<String>) -> Result<TopicaConfig> {
    let mut config = match explicit {
        Some(path) => {
            let mut config = TopicaConfig::load_layers(&[TopicaConfig::default_global_path()])
                .context("Failed to load global configuration")?;
            let layer = TopicaConfig::load_from_file(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
            config.merge(&layer);
            config
        }
        None => TopicaConfig::discover_and_load().context("Failed to load configuration")?,
    };

    if let Some(command) = engine {
        config.engine.command = Some(command);
        config.engine.args.clear();
    }
    Ok(config)
}
