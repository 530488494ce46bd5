//! Pair encoding and the convolutional change classifier.
//!
//! # Modules
//!
//! - [`encoder`]: turns a before/after image pair into a `[1, 6, H, W]` tensor
//! - [`classifier`]: three strided convolutions, spatial mean, linear logit
//! - [`device`]: compute device selection

pub mod classifier;
pub mod device;
pub mod encoder;

pub use classifier::{save_checkpoint, ChangeClassifier, Decision, DecisionScore, MIN_INPUT_SIDE};
pub use device::select_device;
pub use encoder::{fit_within, EncodedPair, ImagePair, MalformedPair, PairEncoder};
