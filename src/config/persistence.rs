use crate::error::{GroveError, Result};
use std::path::Path;

use crate::config::paths::*;
use crate::config::schema::*;

/// Load the daemon config, falling back to defaults when no file exists.
pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_path()?)
}

pub fn load_config_from(config_path: &Path) -> Result<Config> {
    let config = if !config_path.exists() {
        tracing::debug!(
            "No config file at {}, using defaults",
            config_path.display()
        );
        Config::default()
    } else {
        let toml_content = std::fs::read_to_string(config_path)
            .map_err(|e| GroveError::Config(format!("Failed to read config file: {}", e)))?;

        toml::from_str(&toml_content)
            .map_err(|e| GroveError::Config(format!("Failed to parse config: {}", e)))?
    };

    validate_config(&config)?;
    Ok(config)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(config, &get_config_path()?)
}

pub fn save_config_to(config: &Config, config_path: &Path) -> Result<()> {
    if let Some(parent) = config_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            GroveError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }
    let toml_str = toml::to_string_pretty(config)
        .map_err(|e| GroveError::Config(format!("Failed to serialize config: {}", e)))?;
    std::fs::write(config_path, toml_str)
        .map_err(|e| GroveError::Config(format!("Failed to write config file: {}", e)))?;
    Ok(())
}
