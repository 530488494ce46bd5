//! Pair encoder: before/after images to a normalized 6-channel tensor.
//!
//! Both images are converted to RGB, downscaled so neither side exceeds the
//! bound (aspect ratio kept, never upscaled), stacked on the channel axis with
//! `before` in channels 0..3 and `after` in 3..6, laid out channel-first with a
//! batch axis of one, and mapped from `[0, 255]` to `[-1, 1]` by `v / 127.5 - 1`.

use std::path::PathBuf;

use candle_core::{Device, Tensor};
use changeclf_core::{ChangeClfError, Result, DEFAULT_MAX_SIDE};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, RgbImage};

use crate::classifier::MIN_INPUT_SIDE;

/// Channels per encoded image.
const RGB_CHANNELS: usize = 3;

/// A before/after image pair.
#[derive(Debug, Clone)]
pub struct ImagePair {
    pub before: DynamicImage,
    pub after: DynamicImage,
}

impl ImagePair {
    pub fn new(before: DynamicImage, after: DynamicImage) -> Self {
        Self { before, after }
    }

    /// Whether both images report identical pixel dimensions.
    pub fn same_dimensions(&self) -> bool {
        self.before.dimensions() == self.after.dimensions()
    }
}

/// Why a pair cannot be classified.
///
/// These are expected during filtering and lead to the pair being skipped.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum MalformedPair {
    /// One of the two images is missing or could not be decoded.
    #[error("unreadable image {path}: {reason}")]
    Unreadable { path: PathBuf, reason: String },

    /// The two images do not share pixel dimensions.
    #[error("dimension mismatch: before {before:?}, after {after:?}")]
    DimensionMismatch {
        before: (u32, u32),
        after: (u32, u32),
    },

    /// One of the images has a zero-sized side.
    #[error("empty image")]
    Empty,

    /// After downscaling, a side is too short for the convolution stack.
    #[error("{width}x{height} after downscale, need at least {min} px per side")]
    TooSmall { width: u32, height: u32, min: u32 },

    /// The numeric pipeline failed.
    #[error("tensor failure: {0}")]
    Tensor(String),
}

/// The fixed-layout tensor for one pair, shape `[1, 6, H, W]`, `f32`.
#[derive(Debug, Clone)]
pub struct EncodedPair {
    tensor: Tensor,
}

impl EncodedPair {
    pub fn tensor(&self) -> &Tensor {
        &self.tensor
    }

    /// Spatial size as `(height, width)`.
    pub fn spatial_dims(&self) -> (usize, usize) {
        let dims = self.tensor.dims();
        (dims[2], dims[3])
    }

    /// Flattened values, channel-major.
    pub fn to_vec(&self) -> candle_core::Result<Vec<f32>> {
        self.tensor.flatten_all()?.to_vec1()
    }
}

/// Target size for downscaling `width x height` into a `bound x bound` box.
///
/// Keeps the aspect ratio, rounds to the nearest pixel, and never upscales.
/// Each side is at least one pixel, and a zero bound is treated as one.
pub fn fit_within(width: u32, height: u32, bound: u32) -> (u32, u32) {
    let bound = bound.max(1);
    if width <= bound && height <= bound {
        return (width, height);
    }
    let scale = f64::min(
        f64::from(bound) / f64::from(width),
        f64::from(bound) / f64::from(height),
    );
    let w = (f64::from(width) * scale).round() as u32;
    let h = (f64::from(height) * scale).round() as u32;
    (w.clamp(1, bound), h.clamp(1, bound))
}

/// Encodes image pairs for the classifier.
#[derive(Debug, Clone, Copy)]
pub struct PairEncoder {
    max_side: u32,
}

impl Default for PairEncoder {
    fn default() -> Self {
        Self {
            max_side: DEFAULT_MAX_SIDE,
        }
    }
}

impl PairEncoder {
    /// Create an encoder that downscales to at most `max_side` pixels.
    ///
    /// A bound below [`MIN_INPUT_SIDE`] would reject every pair, so it is a
    /// configuration error.
    pub fn new(max_side: u32) -> Result<Self> {
        if (max_side as usize) < MIN_INPUT_SIDE {
            return Err(ChangeClfError::Config(format!(
                "max_side must be at least {MIN_INPUT_SIDE}, got {max_side}"
            )));
        }
        Ok(Self { max_side })
    }

    /// Encode `pair` into a `[1, 6, H, W]` tensor on `device`.
    pub fn encode(
        &self,
        pair: &ImagePair,
        device: &Device,
    ) -> std::result::Result<EncodedPair, MalformedPair> {
        let before = self.downscale(&pair.before)?;
        let after = self.downscale(&pair.after)?;

        if before.dimensions() != after.dimensions() {
            return Err(MalformedPair::DimensionMismatch {
                before: before.dimensions(),
                after: after.dimensions(),
            });
        }

        let (width, height) = before.dimensions();
        let min = MIN_INPUT_SIDE as u32;
        if width < min || height < min {
            return Err(MalformedPair::TooSmall { width, height, min });
        }

        let (w, h) = (width as usize, height as usize);
        let plane = w * h;
        let mut data = vec![0f32; 2 * RGB_CHANNELS * plane];
        for (offset, img) in [(0, &before), (RGB_CHANNELS, &after)] {
            for (x, y, pixel) in img.enumerate_pixels() {
                let idx = y as usize * w + x as usize;
                for c in 0..RGB_CHANNELS {
                    data[(offset + c) * plane + idx] = f32::from(pixel.0[c]) / 127.5 - 1.0;
                }
            }
        }

        let tensor = Tensor::from_vec(data, (1, 2 * RGB_CHANNELS, h, w), device)
            .map_err(|e| MalformedPair::Tensor(e.to_string()))?;
        Ok(EncodedPair { tensor })
    }

    fn downscale(&self, img: &DynamicImage) -> std::result::Result<RgbImage, MalformedPair> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(MalformedPair::Empty);
        }
        let rgb = img.to_rgb8();
        let (w, h) = fit_within(width, height, self.max_side);
        if (w, h) == (width, height) {
            return Ok(rgb);
        }
        Ok(image::imageops::resize(&rgb, w, h, FilterType::CatmullRom))
    }
}
