//! Core types and errors for changeclf
//!
//! This crate holds the pieces shared by the model and pipeline crates: the
//! error taxonomy and the run configuration for training and filtering.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod config;

pub use config::{load_filter_config, load_train_config};

/// Longest side, in pixels, an image may have after encoding.
pub const DEFAULT_MAX_SIDE: u32 = 256;

// ---------------------------------------------------------------------------
// Compute device
// ---------------------------------------------------------------------------

/// Which compute device a run should use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    /// First available accelerator, otherwise CPU.
    #[default]
    Auto,
    Cpu,
    Cuda,
    Metal,
}

impl std::str::FromStr for DeviceKind {
    type Err = ChangeClfError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "cpu" => Ok(Self::Cpu),
            "cuda" => Ok(Self::Cuda),
            "metal" => Ok(Self::Metal),
            other => Err(ChangeClfError::Config(format!("unknown device: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Training configuration
// ---------------------------------------------------------------------------

/// Configuration for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// Directory holding one sub-directory per labeled example.
    #[serde(default = "default_label_dir")]
    pub label_dir: PathBuf,
    /// Directory receiving one checkpoint per epoch.
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,
    /// Number of examples held out for evaluation.
    #[serde(default = "default_test_size")]
    pub test_size: usize,
    /// Number of passes over the training split.
    #[serde(default = "default_epochs")]
    pub epochs: usize,
    /// Adam learning rate.
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    /// Longest side an image is downscaled to before encoding.
    #[serde(default = "default_max_side")]
    pub max_side: u32,
    /// Seed for the train/test shuffle. `None` draws fresh entropy each run.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Keep only the newest `k` checkpoints. `None` keeps every epoch.
    #[serde(default)]
    pub keep_last: Option<usize>,
    #[serde(default)]
    pub device: DeviceKind,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            label_dir: default_label_dir(),
            checkpoint_dir: default_checkpoint_dir(),
            test_size: default_test_size(),
            epochs: default_epochs(),
            learning_rate: default_learning_rate(),
            max_side: default_max_side(),
            seed: None,
            keep_last: None,
            device: DeviceKind::Auto,
        }
    }
}

fn default_label_dir() -> PathBuf {
    PathBuf::from("change_labeled")
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from("ckpt")
}

fn default_test_size() -> usize {
    40
}

fn default_epochs() -> usize {
    100
}

fn default_learning_rate() -> f64 {
    1e-3
}

fn default_max_side() -> u32 {
    DEFAULT_MAX_SIDE
}

// ---------------------------------------------------------------------------
// Filtering configuration
// ---------------------------------------------------------------------------

/// Configuration for one filtering run over an unlabeled corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Checkpoint to load the classifier from.
    #[serde(default = "default_checkpoint")]
    pub checkpoint: PathBuf,
    /// Directory of pipeline inputs ("before" images).
    #[serde(default)]
    pub input_dir: PathBuf,
    /// Directory of pipeline outputs ("after" images), matched to inputs by name.
    #[serde(default)]
    pub output_dir: PathBuf,
    /// Destination for outputs classified as changed.
    #[serde(default)]
    pub filtered_dir: PathBuf,
    #[serde(default = "default_max_side")]
    pub max_side: u32,
    #[serde(default)]
    pub device: DeviceKind,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            checkpoint: default_checkpoint(),
            input_dir: PathBuf::new(),
            output_dir: PathBuf::new(),
            filtered_dir: PathBuf::new(),
            max_side: default_max_side(),
            device: DeviceKind::Auto,
        }
    }
}

fn default_checkpoint() -> PathBuf {
    PathBuf::from("ckpt/model_99.safetensors")
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Core error types.
#[derive(thiserror::Error, Debug)]
pub enum ChangeClfError {
    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Model construction or numeric failure.
    #[error("Model error: {0}")]
    Model(String),

    /// Checkpoint could not be written or restored.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Label store is missing, unreadable, or holds a corrupt example.
    #[error("Label store error: {0}")]
    LabelStore(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The operator asked the run to stop.
    #[error("Interrupted")]
    Interrupted,
}

/// Convenience alias for `std::result::Result<T, ChangeClfError>`.
pub type Result<T> = std::result::Result<T, ChangeClfError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_train_config_default() {
        let cfg = TrainConfig::default();
        assert_eq!(cfg.test_size, 40);
        assert_eq!(cfg.epochs, 100);
        assert!((cfg.learning_rate - 1e-3).abs() < 1e-12);
        assert_eq!(cfg.max_side, 256);
        assert_eq!(cfg.seed, None);
        assert_eq!(cfg.keep_last, None);
        assert_eq!(cfg.label_dir, PathBuf::from("change_labeled"));
        assert_eq!(cfg.checkpoint_dir, PathBuf::from("ckpt"));
    }

    #[test]
    fn test_filter_config_default() {
        let cfg = FilterConfig::default();
        assert_eq!(cfg.checkpoint, PathBuf::from("ckpt/model_99.safetensors"));
        assert_eq!(cfg.max_side, DEFAULT_MAX_SIDE);
    }

    #[test]
    fn test_device_kind_parse() {
        assert_eq!("CPU".parse::<DeviceKind>().unwrap(), DeviceKind::Cpu);
        assert_eq!("auto".parse::<DeviceKind>().unwrap(), DeviceKind::Auto);
        assert!(matches!(
            "tpu".parse::<DeviceKind>(),
            Err(ChangeClfError::Config(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = ChangeClfError::Checkpoint("missing".to_string());
        assert_eq!(err.to_string(), "Checkpoint error: missing");
        assert_eq!(ChangeClfError::Interrupted.to_string(), "Interrupted");
    }

    #[test]
    fn test_io_error_converts() {
        fn fails() -> Result<()> {
            std::fs::read("/nonexistent/changeclf/file")?;
            Ok(())
        }
        assert!(matches!(fails(), Err(ChangeClfError::Io(_))));
    }
}
