//! Convolutional change classifier.
//!
//! Maps an encoded before/after pair to a single logit. A positive logit
//! means the pipeline changed the image; `sigmoid(logit)` is the probability
//! of change.
//!
//! # Architecture
//!
//! ```text
//! Input [B, 6, H, W]
//!   → Conv2d(6→32, k3, s2) → ReLU
//!   → Conv2d(32→32, k3, s2) → ReLU
//!   → Conv2d(32→32, k3, s2) → ReLU
//!   → mean over H×W → Linear(32→1)
//! ```

use std::path::Path;

use candle_core::{DType, Device, Module, Tensor, D};
use candle_nn::{Conv2d, Conv2dConfig, Linear, VarBuilder, VarMap};
use changeclf_core::{ChangeClfError, Result};

use crate::encoder::EncodedPair;

/// Channels of an encoded pair (two RGB images).
pub const INPUT_CHANNELS: usize = 6;

/// Width of every convolutional stage.
pub const HIDDEN: usize = 32;

const KERNEL: usize = 3;
const STRIDE: usize = 2;

/// Smallest spatial side that survives the three unpadded stride-2 convolutions.
pub const MIN_INPUT_SIDE: usize = 15;

/// Binary decision derived from a [`DecisionScore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Changed,
    Unchanged,
}

/// Raw logit produced by the classifier for one pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecisionScore(pub f32);

impl DecisionScore {
    pub fn logit(self) -> f32 {
        self.0
    }

    /// `true` iff the logit is strictly positive. Zero counts as unchanged.
    pub fn is_changed(self) -> bool {
        self.0 > 0.0
    }

    pub fn decision(self) -> Decision {
        if self.is_changed() {
            Decision::Changed
        } else {
            Decision::Unchanged
        }
    }

    /// Probability of change, `sigmoid(logit)`.
    pub fn probability(self) -> f64 {
        1.0 / (1.0 + (-f64::from(self.0)).exp())
    }
}

impl std::fmt::Display for DecisionScore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

/// Three-stage convolutional classifier with a linear read-out.
pub struct ChangeClassifier {
    conv1: Conv2d,
    conv2: Conv2d,
    conv3: Conv2d,
    out: Linear,
    device: Device,
}

impl ChangeClassifier {
    /// Create a classifier with random weights.
    ///
    /// Suitable for architecture validation. For filtering, use
    /// [`ChangeClassifier::load`] with trained weights.
    pub fn new_random(device: &Device) -> Result<Self> {
        let varmap = VarMap::new();
        Self::new_trainable(&varmap, device)
    }

    /// Create a classifier whose parameters live in `varmap`.
    ///
    /// The caller keeps the `VarMap` to hand its variables to an optimizer
    /// and to write checkpoints.
    pub fn new_trainable(varmap: &VarMap, device: &Device) -> Result<Self> {
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        Self::build(vb, device)
            .map_err(|e| ChangeClfError::Model(format!("Failed to create classifier: {e}")))
    }

    /// Load a classifier from a safetensors checkpoint.
    ///
    /// Returns an error if the file cannot be read or the weights are
    /// incompatible with the expected architecture.
    pub fn load(path: &Path, device: &Device) -> Result<Self> {
        if !path.is_file() {
            return Err(ChangeClfError::Checkpoint(format!(
                "checkpoint not found: {}",
                path.display()
            )));
        }
        // SAFETY: memory-mapping safetensors is the standard candle pattern.
        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[path], DType::F32, device).map_err(|e| {
                ChangeClfError::Checkpoint(format!(
                    "Failed to read checkpoint {}: {e}",
                    path.display()
                ))
            })?
        };
        let model = Self::build(vb, device).map_err(|e| {
            ChangeClfError::Checkpoint(format!(
                "Checkpoint {} does not match the classifier: {e}",
                path.display()
            ))
        })?;
        tracing::info!(path = %path.display(), "Loaded classifier checkpoint");
        Ok(model)
    }

    fn build(vb: VarBuilder, device: &Device) -> candle_core::Result<Self> {
        let cfg = Conv2dConfig {
            stride: STRIDE,
            ..Default::default()
        };
        let conv1 = candle_nn::conv2d(INPUT_CHANNELS, HIDDEN, KERNEL, cfg, vb.pp("conv1"))?;
        let conv2 = candle_nn::conv2d(HIDDEN, HIDDEN, KERNEL, cfg, vb.pp("conv2"))?;
        let conv3 = candle_nn::conv2d(HIDDEN, HIDDEN, KERNEL, cfg, vb.pp("conv3"))?;
        let out = candle_nn::linear(HIDDEN, 1, vb.pp("out"))?;
        Ok(Self {
            conv1,
            conv2,
            conv3,
            out,
            device: device.clone(),
        })
    }

    /// Forward pass: `[B, 6, H, W]` to logits `[B, 1]`.
    pub fn forward_logits(&self, input: &Tensor) -> candle_core::Result<Tensor> {
        let (_, channels, height, width) = input.dims4()?;
        if channels != INPUT_CHANNELS {
            candle_core::bail!("expected {INPUT_CHANNELS} input channels, got {channels}");
        }
        if height < MIN_INPUT_SIDE || width < MIN_INPUT_SIDE {
            candle_core::bail!(
                "input {height}x{width} is smaller than {MIN_INPUT_SIDE}x{MIN_INPUT_SIDE}"
            );
        }
        let spatial = self.conv1.forward(&trim_unread_edges(input)?)?.relu()?;
        let spatial = self.conv2.forward(&trim_unread_edges(&spatial)?)?.relu()?;
        let spatial = self.conv3.forward(&trim_unread_edges(&spatial)?)?.relu()?;
        let pooled = spatial.flatten_from(2)?.mean(D::Minus1)?;
        self.out.forward(&pooled)
    }

    /// Score one encoded pair.
    pub fn score(&self, pair: &EncodedPair) -> Result<DecisionScore> {
        let logit = self
            .forward_logits(pair.tensor())
            .and_then(|t| t.flatten_all())
            .and_then(|t| t.to_vec1::<f32>())
            .map_err(|e| ChangeClfError::Model(format!("Forward pass failed: {e}")))?;
        let value = logit
            .first()
            .copied()
            .ok_or_else(|| ChangeClfError::Model("classifier produced no logit".to_string()))?;
        Ok(DecisionScore(value))
    }

    /// Returns a reference to the device this classifier runs on.
    pub fn device(&self) -> &Device {
        &self.device
    }
}

/// Drop the trailing row or column a k=3 stride-2 convolution never reads.
///
/// When `side - KERNEL` is odd the last row (or column) contributes to no
/// output, so removing it leaves the forward result unchanged. With both sides
/// trimmed this way candle's conv2d backward, which derives one output padding
/// from the height alone, yields an input gradient of the right shape on
/// both axes. The dropped edge gets a zero gradient through `narrow`.
fn trim_unread_edges(x: &Tensor) -> candle_core::Result<Tensor> {
    let (_, _, height, width) = x.dims4()?;
    let mut x = x.clone();
    if (height - KERNEL) % STRIDE != 0 {
        x = x.narrow(2, 0, height - (height - KERNEL) % STRIDE)?;
    }
    if (width - KERNEL) % STRIDE != 0 {
        x = x.narrow(3, 0, width - (width - KERNEL) % STRIDE)?;
    }
    x.contiguous()
}

/// Write every variable in `varmap` to a safetensors file at `path`.
pub fn save_checkpoint(varmap: &VarMap, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    varmap.save(path).map_err(|e| {
        ChangeClfError::Checkpoint(format!("Failed to save {}: {e}", path.display()))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
