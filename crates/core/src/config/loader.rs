//! Configuration file loader.
//!
//! Loads the engine configuration from a single YAML document. Every field
//! has a serde default, so a partial document is fine; a missing file
//! yields the built-in defaults rather than an error.

use crate::config::error::{ConfigError, ConfigResult};
use sq_protocol::config_models::EngineConfig;
use std::path::Path;

/// Load the engine configuration from `path`.
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read, has
/// invalid YAML syntax, or carries unusable values (a zero concurrency
/// cap).
pub async fn load_config(path: &Path) -> ConfigResult<EngineConfig> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;

    let config: EngineConfig =
        serde_yaml::from_str(&raw).map_err(|source| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source,
        })?;

    if config.max_concurrent_tasks == 0 {
        return Err(ConfigError::InvalidConfig {
            path: path.to_path_buf(),
            reason: "max_concurrent_tasks must be at least 1".to_string(),
        });
    }

    Ok(config)
}
