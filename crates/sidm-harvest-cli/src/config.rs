//! Configuration loading and path resolution.
//!
//! Every path resolves in the same order: explicit flag, environment
//! variable, file in the working directory, home-directory default.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use sidm_harvest::HarvestConfig;

const HOME_DIR: &str = ".sidm-harvest";

fn home_default(file: &str) -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(HOME_DIR)
        .join(file)
}

/// Resolve the configuration file, if any exists.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("SIDM_CONFIG") {
        return Some(PathBuf::from(env_path));
    }

    let cwd_config = PathBuf::from("sidm-harvest.json");
    if cwd_config.exists() {
        return Some(cwd_config);
    }

    Some(home_default("config.json")).filter(|p| p.exists())
}

/// Resolve the SQLite database path.
pub fn resolve_db_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }

    if let Ok(env_path) = std::env::var("SIDM_DB") {
        return PathBuf::from(env_path);
    }

    let cwd_db = PathBuf::from("sidm.db");
    if cwd_db.exists() {
        return cwd_db;
    }

    home_default("sidm.db")
}

/// Resolve the raw payload cache directory; none disables caching.
pub fn resolve_cache_dir(explicit: Option<&Path>, config: &HarvestConfig) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var("SIDM_CACHE_DIR") {
        return Some(PathBuf::from(env_path));
    }

    config.cache_dir.clone()
}

/// Load a JSON configuration file; missing keys take their defaults.
pub fn load_config(path: Option<&Path>) -> Result<HarvestConfig> {
    let Some(path) = path else {
        return Ok(HarvestConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config: {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("invalid config: {}", path.display()))
}
