//! Training and filtering pipeline for the before/after change classifier.
//!
//! # Modules
//!
//! - [`label_store`]: on-disk and in-memory corpora of labeled pairs
//! - [`metrics`]: per-split loss/accuracy accumulation and epoch reports
//! - [`trainer`]: train/test split, per-example Adam training, checkpoints
//! - [`filter`]: applies a checkpoint to an unlabeled corpus, copies kept outputs
//! - [`interrupt`]: operator cancellation shared with the Ctrl-C handler

pub mod filter;
pub mod interrupt;
pub mod label_store;
pub mod metrics;
pub mod trainer;

/// Re-export commonly used types for pipeline callers.
pub mod prelude {
    pub use crate::filter::{run_filter, BatchFilter, FilterSummary, PairOutcome};
    pub use crate::interrupt::InterruptFlag;
    pub use crate::label_store::{LabelSource, LabelStore, LabeledExample, MemoryLabelStore};
    pub use crate::metrics::{EpochMetrics, SplitStats};
    pub use crate::trainer::{checkpoint_path, split_names, train, DataSplit};
}
