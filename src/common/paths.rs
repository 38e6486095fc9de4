use anyhow::{Context, Result};
use std::path::PathBuf;

/// Get the beatcut config directory, creating it on first use
pub fn beatcut_config_dir() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .context("Unable to determine user config directory")?
        .join("beatcut");

    std::fs::create_dir_all(&config_dir)
        .with_context(|| format!("creating config directory at {}", config_dir.display()))?;

    Ok(config_dir)
}

/// Path of the main configuration file
pub fn config_file_path() -> Result<PathBuf> {
    Ok(beatcut_config_dir()?.join("config.toml"))
}
