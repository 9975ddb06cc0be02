//! Loading configuration files.

use super::PipelineConfig;
use crate::errors::{ChurnflowError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "churnflow.toml";

/// Parses configuration from TOML text and validates it.
///
/// # Errors
///
/// Returns a parse error for malformed TOML or a configuration error for
/// invalid values.
pub fn parse_str(contents: &str) -> Result<PipelineConfig> {
    let config: PipelineConfig = toml::from_str(contents)?;
    config.validate()?;
    Ok(config)
}

/// Reads, parses and validates a configuration file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed, or validated.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ChurnflowError::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), "loaded config file");
    parse_str(&contents)
}

/// Loads `path` if given, else the default file if present, else built-in
/// defaults.
///
/// # Errors
///
/// Returns an error if an existing file cannot be loaded.
pub fn load_or_default(path: Option<&Path>) -> Result<PipelineConfig> {
    if let Some(path) = path {
        return load_from_path(path);
    }
    let default = default_config_path();
    if default.exists() {
        load_from_path(&default)
    } else {
        debug!("no config file; using built-in defaults");
        Ok(PipelineConfig::default())
    }
}

/// Returns the default config location.
#[must_use]
pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}
