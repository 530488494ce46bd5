//! Training loop for the change classifier.
//!
//! One run shuffles the example names once, holds out a fixed number for
//! evaluation, then for every epoch takes one Adam step per training example,
//! evaluates the held-out set without updates, reports the four epoch
//! metrics, and writes a checkpoint named for the epoch.

use std::path::{Path, PathBuf};

use candle_core::{Device, Tensor};
use candle_nn::{Optimizer, VarMap};
use changeclf_core::{ChangeClfError, Result, TrainConfig};
use changeclf_model::{save_checkpoint, ChangeClassifier, PairEncoder};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::interrupt::InterruptFlag;
use crate::label_store::{LabelSource, LabeledExample};
use crate::metrics::{EpochMetrics, SplitStats};

/// Examples between progress log lines.
const PROGRESS_EVERY: usize = 500;

/// Train/test partition of example names.
#[derive(Debug, Clone, PartialEq)]
pub struct DataSplit {
    pub train: Vec<String>,
    pub test: Vec<String>,
}

/// Shuffle `names` and hold out the first `test_size` of them.
///
/// With `seed: None` the shuffle draws fresh entropy, so every run sees a
/// different split. If there are no more than `test_size` names, all of them
/// are test examples and the training split is empty.
pub fn split_names(mut names: Vec<String>, test_size: usize, seed: Option<u64>) -> DataSplit {
    let mut rng = match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    };
    names.shuffle(&mut rng);
    let train = names.split_off(test_size.min(names.len()));
    DataSplit { train, test: names }
}

/// Checkpoint file for `epoch` inside `dir`.
pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("model_{epoch}.safetensors"))
}

/// Numerically stable binary cross-entropy on logits, averaged over elements.
///
/// `max(x, 0) - x * y + ln(1 + exp(-|x|))`
pub fn bce_with_logits(logits: &Tensor, targets: &Tensor) -> candle_core::Result<Tensor> {
    let positive = logits.relu()?;
    let cross = (logits * targets)?;
    let softplus = ((logits.abs()?.neg()?.exp()? + 1.0)?).log()?;
    ((positive - cross)? + softplus)?.mean_all()
}

/// Run the full training pipeline: split, train, evaluate, checkpoint.
pub fn train<S: LabelSource + ?Sized>(
    config: &TrainConfig,
    source: &S,
    device: &Device,
    interrupt: &InterruptFlag,
) -> Result<Vec<EpochMetrics>> {
    let names = source.names()?;
    let split = split_names(names, config.test_size, config.seed);
    tracing::info!(
        train = split.train.len(),
        test = split.test.len(),
        "Split label store"
    );

    let varmap = VarMap::new();
    let model = ChangeClassifier::new_trainable(&varmap, device)?;
    let mut optimizer = candle_nn::AdamW::new(
        varmap.all_vars(),
        candle_nn::ParamsAdamW {
            lr: config.learning_rate,
            weight_decay: 0.0,
            ..Default::default()
        },
    )
    .map_err(|e| ChangeClfError::Model(format!("Failed to create optimizer: {e}")))?;

    let encoder = PairEncoder::new(config.max_side)?;
    let step = Step {
        model: &model,
        encoder,
        device,
    };

    std::fs::create_dir_all(&config.checkpoint_dir)?;
    tracing::info!(
        lr = config.learning_rate,
        epochs = config.epochs,
        checkpoint_dir = %config.checkpoint_dir.display(),
        "Training"
    );

    let mut history = Vec::with_capacity(config.epochs);
    for epoch in 0..config.epochs {
        let mut train_stats = SplitStats::new();
        for (i, name) in split.train.iter().enumerate() {
            interrupt.check()?;
            let example = source.load(name)?;
            let (loss, logit) = step.loss(&example)?;
            optimizer
                .backward_step(&loss)
                .map_err(|e| ChangeClfError::Model(format!("Backward step failed on {name}: {e}")))?;
            train_stats.record(scalar(&loss)?, logit > 0.0, example.changed);

            if (i + 1) % PROGRESS_EVERY == 0 {
                tracing::debug!(epoch, done = i + 1, total = split.train.len(), "train progress");
            }
        }

        let mut test_stats = SplitStats::new();
        for name in &split.test {
            interrupt.check()?;
            let example = source.load(name)?;
            let (loss, logit) = step.loss(&example)?;
            test_stats.record(scalar(&loss.detach())?, logit > 0.0, example.changed);
        }

        let metrics = EpochMetrics {
            epoch,
            train: train_stats,
            test: test_stats,
        };
        println!("{metrics}");
        tracing::debug!(epoch, train = %metrics.train, test = %metrics.test, "epoch detail");

        let path = checkpoint_path(&config.checkpoint_dir, epoch);
        if path.exists() {
            tracing::warn!(path = %path.display(), "Replacing checkpoint from an earlier run");
        }
        save_checkpoint(&varmap, &path)?;
        tracing::info!(epoch, path = %path.display(), "Saved checkpoint");
        prune_checkpoints(&config.checkpoint_dir, epoch, config.keep_last)?;

        history.push(metrics);
    }

    Ok(history)
}

/// Forward pass and loss for one labeled example.
struct Step<'a> {
    model: &'a ChangeClassifier,
    encoder: PairEncoder,
    device: &'a Device,
}

impl Step<'_> {
    fn loss(&self, example: &LabeledExample) -> Result<(Tensor, f32)> {
        let encoded = self
            .encoder
            .encode(&example.pair, self.device)
            .map_err(|e| ChangeClfError::LabelStore(format!("{}: {e}", example.name)))?;
        let target = if example.changed { 1.0f32 } else { 0.0 };
        let forward = || -> candle_core::Result<(Tensor, f32)> {
            let logits = self.model.forward_logits(encoded.tensor())?;
            let targets = Tensor::new(&[[target]], self.device)?;
            let loss = bce_with_logits(&logits, &targets)?;
            let logit = logits.flatten_all()?.to_vec1::<f32>()?;
            Ok((loss, logit.first().copied().unwrap_or(0.0)))
        };
        forward().map_err(|e| {
            ChangeClfError::Model(format!("Forward pass failed on {}: {e}", example.name))
        })
    }
}

fn scalar(loss: &Tensor) -> Result<f64> {
    loss.to_scalar::<f32>()
        .map(f64::from)
        .map_err(|e| ChangeClfError::Model(format!("Loss scalar failed: {e}")))
}

/// Delete the checkpoint that falls out of a `keep_last` window.
fn prune_checkpoints(dir: &Path, epoch: usize, keep_last: Option<usize>) -> Result<()> {
    let Some(keep) = keep_last else {
        return Ok(());
    };
    let keep = keep.max(1);
    if epoch < keep {
        return Ok(());
    }
    let stale = checkpoint_path(dir, epoch - keep);
    if stale.exists() {
        std::fs::remove_file(&stale)?;
        tracing::debug!(path = %stale.display(), "Pruned checkpoint");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::label_store::MemoryLabelStore;
    use changeclf_model::ImagePair;
    use image::{DynamicImage, Rgb, RgbImage};

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("ex{i:03}")).collect()
    }

    fn memory_store(n: usize) -> MemoryLabelStore {
        let mut store = MemoryLabelStore::new();
        for (i, name) in names(n).into_iter().enumerate() {
            let changed = i % 2 == 0;
            let before = RgbImage::from_fn(16, 16, |x, y| Rgb([(x * 8) as u8, (y * 8) as u8, 0]));
            let mut after = before.clone();
            if changed {
                for p in after.pixels_mut() {
                    p.0[2] = 255;
                }
            }
            store.insert(LabeledExample {
                name,
                pair: ImagePair::new(DynamicImage::ImageRgb8(before), DynamicImage::ImageRgb8(after)),
                changed,
            });
        }
        store
    }

    /// One changed and one unchanged example per `(width, height)`.
    fn sized_store(sizes: &[(u32, u32)]) -> MemoryLabelStore {
        let mut store = MemoryLabelStore::new();
        for &(width, height) in sizes {
            let before = RgbImage::from_fn(width, height, |x, y| {
                Rgb([(x % 251) as u8, (y % 241) as u8, 40])
            });
            let mut after = before.clone();
            for p in after.pixels_mut() {
                p.0[1] = 255 - p.0[1];
            }
            for (suffix, changed, after) in [("a", true, after), ("b", false, before.clone())] {
                store.insert(LabeledExample {
                    name: format!("{width}x{height}_{suffix}"),
                    pair: ImagePair::new(
                        DynamicImage::ImageRgb8(before.clone()),
                        DynamicImage::ImageRgb8(after),
                    ),
                    changed,
                });
            }
        }
        store
    }

    fn config(dir: &Path, epochs: usize, test_size: usize) -> TrainConfig {
        TrainConfig {
            label_dir: dir.join("unused"),
            checkpoint_dir: dir.join("ckpt"),
            test_size,
            epochs,
            ..TrainConfig::default()
        }
    }

    #[test]
    fn test_split_sizes() {
        let split = split_names(names(50), 40, None);
        assert_eq!(split.test.len(), 40);
        assert_eq!(split.train.len(), 10);

        let mut all: Vec<String> = split.train.iter().chain(&split.test).cloned().collect();
        all.sort();
        assert_eq!(all, names(50));
    }

    #[test]
    fn test_split_smaller_than_test_size() {
        let split = split_names(names(5), 40, None);
        assert_eq!(split.test.len(), 5);
        assert!(split.train.is_empty());
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let a = split_names(names(30), 10, Some(7));
        let b = split_names(names(30), 10, Some(7));
        assert_eq!(a, b);
    }

    #[test]
    fn test_checkpoint_path_names_epoch() {
        let path = checkpoint_path(Path::new("ckpt"), 12);
        assert_eq!(path, PathBuf::from("ckpt/model_12.safetensors"));
    }

    #[test]
    fn test_bce_with_logits_matches_closed_form() {
        let device = Device::Cpu;
        for (x, y) in [(0.0f32, 1.0f32), (2.0, 0.0), (-3.0, 1.0), (50.0, 1.0), (-50.0, 0.0)] {
            let logits = Tensor::new(&[[x]], &device).unwrap();
            let targets = Tensor::new(&[[y]], &device).unwrap();
            let loss: f32 = bce_with_logits(&logits, &targets)
                .unwrap()
                .to_scalar()
                .unwrap();
            let p = 1.0 / (1.0 + (-(x as f64)).exp());
            let expected = -(y as f64 * p.max(1e-30).ln() + (1.0 - y as f64) * (1.0 - p).max(1e-30).ln());
            assert!(loss.is_finite());
            assert!((loss as f64 - expected).abs() < 1e-4, "x={x} y={y} loss={loss}");
        }
    }

    #[test]
    fn test_train_two_epochs_writes_two_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2, 4);
        let history = train(&cfg, &memory_store(8), &Device::Cpu, &InterruptFlag::new()).unwrap();

        assert_eq!(history.len(), 2);
        assert_eq!(history[0].train.count(), 4);
        assert_eq!(history[0].test.count(), 4);
        assert!(history.iter().all(|m| m.train_loss().is_finite()));
        assert!(checkpoint_path(&cfg.checkpoint_dir, 0).exists());
        assert!(checkpoint_path(&cfg.checkpoint_dir, 1).exists());
    }

    #[test]
    fn test_keep_last_prunes_old_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            keep_last: Some(1),
            ..config(dir.path(), 3, 2)
        };
        train(&cfg, &memory_store(4), &Device::Cpu, &InterruptFlag::new()).unwrap();

        assert!(!checkpoint_path(&cfg.checkpoint_dir, 0).exists());
        assert!(!checkpoint_path(&cfg.checkpoint_dir, 1).exists());
        assert!(checkpoint_path(&cfg.checkpoint_dir, 2).exists());
    }

    #[test]
    fn test_interrupt_stops_training() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 5, 2);
        let flag = InterruptFlag::new();
        flag.trigger();
        let result = train(&cfg, &memory_store(6), &Device::Cpu, &flag);
        assert!(matches!(result, Err(ChangeClfError::Interrupted)));
        assert!(!checkpoint_path(&cfg.checkpoint_dir, 0).exists());
    }

    #[test]
    fn test_trains_on_non_square_sizes() {
        // Sides whose `side - 3` parity differs between height and width at
        // some convolution stage.
        let sizes = [(24, 20), (100, 75), (1536, 1024), (256, 170), (17, 40)];
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1, 0);
        let history = train(&cfg, &sized_store(&sizes), &Device::Cpu, &InterruptFlag::new()).unwrap();

        assert_eq!(history[0].train.count(), 2 * sizes.len());
        assert!(history[0].train_loss().is_finite());
        assert!(checkpoint_path(&cfg.checkpoint_dir, 0).exists());
    }

    #[test]
    fn test_evaluation_leaves_parameters_untouched() {
        // Every example is held out, so the two checkpoints must match.
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 2, 10);
        let history = train(&cfg, &memory_store(4), &Device::Cpu, &InterruptFlag::new()).unwrap();
        assert_eq!(history[1].train.count(), 0);
        assert_eq!(history[1].test.count(), 4);

        let first =
            candle_core::safetensors::load(checkpoint_path(&cfg.checkpoint_dir, 0), &Device::Cpu)
                .unwrap();
        let second =
            candle_core::safetensors::load(checkpoint_path(&cfg.checkpoint_dir, 1), &Device::Cpu)
                .unwrap();
        assert_eq!(first.len(), 8);
        for (name, tensor) in &first {
            let a: Vec<f32> = tensor.flatten_all().unwrap().to_vec1().unwrap();
            let b: Vec<f32> = second[name].flatten_all().unwrap().to_vec1().unwrap();
            assert_eq!(a, b, "{name} changed during evaluation");
        }
    }

    #[test]
    fn test_stale_checkpoint_from_earlier_run_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), 1, 2);
        std::fs::create_dir_all(&cfg.checkpoint_dir).unwrap();
        let path = checkpoint_path(&cfg.checkpoint_dir, 0);
        std::fs::write(&path, b"left over").unwrap();

        train(&cfg, &memory_store(4), &Device::Cpu, &InterruptFlag::new()).unwrap();
        assert!(ChangeClassifier::load(&path, &Device::Cpu).is_ok());
    }

    #[test]
    fn test_max_side_below_minimum_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            max_side: 0,
            ..config(dir.path(), 1, 2)
        };
        let result = train(&cfg, &memory_store(4), &Device::Cpu, &InterruptFlag::new());
        assert!(matches!(result, Err(ChangeClfError::Config(_))));
        assert!(!cfg.checkpoint_dir.exists());
    }

    #[test]
    fn test_learns_separable_toy_task() {
        // Changed pairs differ in the blue channel; a few epochs on the same
        // examples should push training loss down.
        let dir = tempfile::tempdir().unwrap();
        let cfg = TrainConfig {
            seed: Some(3),
            ..config(dir.path(), 15, 2)
        };
        let history = train(&cfg, &memory_store(12), &Device::Cpu, &InterruptFlag::new()).unwrap();
        let first = history.first().unwrap().train_loss();
        let last = history.last().unwrap().train_loss();
        assert!(last < first, "first={first} last={last}");
    }
}
