//! CLI entry point for training the change classifier.
//!
//! Reads labeled pairs from the label directory and writes one checkpoint per
//! epoch into the checkpoint directory. No argument is required; every
//! setting can come from a YAML file (`--config`) and be overridden by flags.

use anyhow::Context;
use changeclf_core::{load_train_config, DeviceKind, TrainConfig};
use changeclf_model::select_device;
use changeclf_pipeline::interrupt::InterruptFlag;
use changeclf_pipeline::label_store::LabelStore;
use changeclf_pipeline::trainer;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "train-change-clf", about = "Train the before/after change classifier")]
struct Cli {
    /// YAML file with training settings.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of labeled examples (`<name>/input.png`, `output.png`, `label.json`).
    #[arg(long)]
    label_dir: Option<PathBuf>,

    /// Directory receiving `model_<epoch>.safetensors` checkpoints.
    #[arg(long)]
    checkpoint_dir: Option<PathBuf>,

    /// Number of training epochs.
    #[arg(long)]
    epochs: Option<usize>,

    /// Number of examples held out for evaluation.
    #[arg(long)]
    test_size: Option<usize>,

    /// Adam learning rate.
    #[arg(long)]
    lr: Option<f64>,

    /// Seed for the train/test split. Omit for a fresh split every run.
    #[arg(long)]
    seed: Option<u64>,

    /// Keep only the newest N checkpoints. Omit to keep every epoch.
    #[arg(long)]
    keep_last: Option<usize>,

    /// Compute device: auto, cpu, cuda or metal.
    #[arg(long)]
    device: Option<DeviceKind>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<TrainConfig> {
        let mut config = match &self.config {
            Some(path) => load_train_config(path)?,
            None => TrainConfig::default(),
        };
        if let Some(label_dir) = self.label_dir {
            config.label_dir = label_dir;
        }
        if let Some(checkpoint_dir) = self.checkpoint_dir {
            config.checkpoint_dir = checkpoint_dir;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if let Some(test_size) = self.test_size {
            config.test_size = test_size;
        }
        if let Some(lr) = self.lr {
            config.learning_rate = lr;
        }
        if self.seed.is_some() {
            config.seed = self.seed;
        }
        if self.keep_last.is_some() {
            config.keep_last = self.keep_last;
        }
        if let Some(device) = self.device {
            config.device = device;
        }
        Ok(config)
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.into_config()?;
    let interrupt = InterruptFlag::new();
    interrupt
        .install_ctrlc_handler()
        .context("Failed to set Ctrl-C handler")?;

    let store = LabelStore::open(&config.label_dir)?;
    tracing::info!(label_dir = %store.root().display(), "Opened label store");
    let device = select_device(config.device)?;
    let history = trainer::train(&config, &store, &device, &interrupt)?;
    if let Some(last) = history.last() {
        tracing::info!(epoch = last.epoch, "Training finished");
    }
    Ok(())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(Cli::parse()) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
