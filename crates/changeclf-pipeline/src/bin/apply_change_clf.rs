//! CLI entry point for filtering a generated dataset with a trained classifier.
//!
//! Every output image whose matching input (same file name) is judged to have
//! been changed is copied into the filtered directory. Prints the kept/total
//! summary on completion.

use anyhow::Context;
use changeclf_core::{load_filter_config, DeviceKind, FilterConfig};
use changeclf_pipeline::filter::run_filter;
use changeclf_pipeline::interrupt::InterruptFlag;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "apply-change-clf", about = "Keep only outputs the classifier sees as changed")]
struct Cli {
    /// YAML file with filter settings. Flags override it.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Checkpoint written by train-change-clf.
    #[arg(long)]
    model_ckpt: Option<PathBuf>,

    /// Directory of pipeline inputs.
    #[arg(long)]
    input_dir: PathBuf,

    /// Directory of pipeline outputs, named like their inputs.
    #[arg(long)]
    output_dir: PathBuf,

    /// Destination for kept outputs.
    #[arg(long)]
    filtered_dir: PathBuf,

    /// Compute device: auto, cpu, cuda or metal.
    #[arg(long)]
    device: Option<DeviceKind>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<FilterConfig> {
        let mut config = match &self.config {
            Some(path) => load_filter_config(path)?,
            None => FilterConfig::default(),
        };
        if let Some(checkpoint) = self.model_ckpt {
            config.checkpoint = checkpoint;
        }
        config.input_dir = self.input_dir;
        config.output_dir = self.output_dir;
        config.filtered_dir = self.filtered_dir;
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

    let summary = run_filter(&config, &interrupt).with_context(|| {
        format!(
            "Filtering {} with {} failed",
            config.output_dir.display(),
            config.checkpoint.display()
        )
    })?;
    println!("{summary}");
    tracing::info!(skipped = summary.skipped, "Filtering finished");
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
