//! YAML configuration loading for training and filtering runs.
//!
//! Every field carries a serde default, so a file only needs to name the
//! settings it changes.

use crate::{ChangeClfError, FilterConfig, Result, TrainConfig};
use serde::de::DeserializeOwned;
use std::path::Path;

/// Load a [`TrainConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_train_config(path: &Path) -> Result<TrainConfig> {
    load_yaml(path)
}

/// Load a [`FilterConfig`] from a YAML file at `path`.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn load_filter_config(path: &Path) -> Result<FilterConfig> {
    load_yaml(path)
}

fn load_yaml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        ChangeClfError::Config(format!(
            "Failed to read config file {}: {}",
            path.display(),
            e
        ))
    })?;
    serde_yaml::from_str(&contents)
        .map_err(|e| ChangeClfError::Config(format!("Failed to parse config YAML: {}", e)))
}
