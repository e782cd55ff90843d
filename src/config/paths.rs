use crate::error::{GroveError, Result};
use directories::ProjectDirs;
use std::path::PathBuf;

pub fn expand_tilde(path: &str) -> PathBuf {
    let path = path.trim();
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    } else if path == "~" {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home);
        }
    }
    PathBuf::from(path)
}

pub fn get_config_dir() -> Result<PathBuf> {
    if let Ok(config_dir) = std::env::var("GROVEFS_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let project_dirs = ProjectDirs::from("com", "grovefs", "grovefs")
        .ok_or_else(|| GroveError::Config("Could not determine config directory".to_string()))?;

    Ok(project_dirs.config_dir().to_path_buf())
}

pub fn get_config_path() -> Result<PathBuf> {
    Ok(get_config_dir()?.join("config.toml"))
}

/// Directory holding one client directory (snapshot state) per checkout.
pub fn get_clients_dir() -> Result<PathBuf> {
    if let Ok(env_dir) = std::env::var("GROVEFS_DATA_DIR") {
        return Ok(PathBuf::from(env_dir).join("clients"));
    }
    let config = super::load_config()?;
    Ok(expand_tilde(&config.paths.get_clients_dir()))
}
