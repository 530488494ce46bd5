//! Batch filtering driver.
//!
//! Applies a trained classifier to two parallel directories (pipeline inputs
//! and outputs matched by file name) and copies the outputs classified as
//! changed into a third directory.
//!
//! Pairs that cannot be classified (missing or unreadable image, mismatched
//! dimensions, degenerate size after downscale) come back as
//! [`PairOutcome::Skipped`] and count toward neither `kept` nor `total`.
//! Interrupts are errors and always end the run.

use std::path::{Path, PathBuf};

use changeclf_core::{FilterConfig, Result};
use changeclf_model::{
    select_device, ChangeClassifier, DecisionScore, ImagePair, MalformedPair, PairEncoder,
};
use image::GenericImageView;

use crate::interrupt::InterruptFlag;
use crate::label_store::visible_entries;

/// Entries between progress log lines.
const PROGRESS_EVERY: usize = 1000;

/// Result of classifying one input/output pair.
#[derive(Debug, Clone, PartialEq)]
pub enum PairOutcome {
    /// Classified as changed; the output is kept.
    Kept(DecisionScore),
    /// Classified as unchanged.
    Discarded(DecisionScore),
    /// Could not be classified.
    Skipped(MalformedPair),
}

/// Kept/total counters for one filtering run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterSummary {
    /// Pairs classified as changed and copied forward.
    pub kept: usize,
    /// Pairs successfully classified.
    pub total: usize,
    /// Pairs that could not be classified. Not part of `total`.
    pub skipped: usize,
}

impl FilterSummary {
    pub fn record(&mut self, outcome: &PairOutcome) {
        match outcome {
            PairOutcome::Kept(_) => {
                self.kept += 1;
                self.total += 1;
            }
            PairOutcome::Discarded(_) => self.total += 1,
            PairOutcome::Skipped(_) => self.skipped += 1,
        }
    }

    /// Percentage of processed pairs that were kept, 0 when nothing was processed.
    pub fn percent_kept(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.kept as f64 / self.total as f64
    }
}

impl std::fmt::Display for FilterSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "kept a total of {}/{} ({:.2}%)",
            self.kept,
            self.total,
            self.percent_kept()
        )
    }
}

/// Classifies pairs with a read-only classifier.
pub struct BatchFilter<'a> {
    classifier: &'a ChangeClassifier,
    encoder: PairEncoder,
    input_dir: PathBuf,
    output_dir: PathBuf,
    filtered_dir: PathBuf,
}

impl<'a> BatchFilter<'a> {
    pub fn new(classifier: &'a ChangeClassifier, config: &FilterConfig) -> Result<Self> {
        Ok(Self {
            classifier,
            encoder: PairEncoder::new(config.max_side)?,
            input_dir: config.input_dir.clone(),
            output_dir: config.output_dir.clone(),
            filtered_dir: config.filtered_dir.clone(),
        })
    }

    /// Classify the pair stored under `name` in the input and output directories.
    ///
    /// Never copies anything.
    pub fn classify_entry(&self, name: &str) -> PairOutcome {
        let pair = match self.load_pair(name) {
            Ok(pair) => pair,
            Err(malformed) => return PairOutcome::Skipped(malformed),
        };
        self.classify_pair(&pair)
    }

    /// Classify an in-memory pair.
    pub fn classify_pair(&self, pair: &ImagePair) -> PairOutcome {
        if !pair.same_dimensions() {
            return PairOutcome::Skipped(MalformedPair::DimensionMismatch {
                before: pair.before.dimensions(),
                after: pair.after.dimensions(),
            });
        }
        let encoded = match self.encoder.encode(pair, self.classifier.device()) {
            Ok(encoded) => encoded,
            Err(malformed) => return PairOutcome::Skipped(malformed),
        };
        match self.classifier.score(&encoded) {
            Ok(score) if score.is_changed() => PairOutcome::Kept(score),
            Ok(score) => PairOutcome::Discarded(score),
            Err(e) => PairOutcome::Skipped(MalformedPair::Tensor(e.to_string())),
        }
    }

    /// Classify every visible entry of the output directory, copying kept outputs.
    ///
    /// # Errors
    ///
    /// Directory listing, directory creation and copy failures, and interrupts.
    /// Per-pair problems are never errors.
    pub fn run(&self, interrupt: &InterruptFlag) -> Result<FilterSummary> {
        std::fs::create_dir_all(&self.filtered_dir)?;
        let names = visible_entries(&self.output_dir)?;
        tracing::info!(
            entries = names.len(),
            output_dir = %self.output_dir.display(),
            "Filtering"
        );

        let mut summary = FilterSummary::default();
        for (i, name) in names.iter().enumerate() {
            interrupt.check()?;
            let outcome = self.classify_entry(name);
            match &outcome {
                PairOutcome::Kept(score) => {
                    std::fs::copy(self.output_dir.join(name), self.filtered_dir.join(name))?;
                    tracing::debug!(%name, %score, "kept");
                }
                PairOutcome::Discarded(score) => tracing::debug!(%name, %score, "discarded"),
                PairOutcome::Skipped(reason) => tracing::debug!(%name, %reason, "skipped"),
            }
            summary.record(&outcome);

            if (i + 1) % PROGRESS_EVERY == 0 {
                tracing::info!(
                    done = i + 1,
                    total = names.len(),
                    kept = summary.kept,
                    skipped = summary.skipped,
                    "filter progress"
                );
            }
        }
        Ok(summary)
    }

    fn load_pair(&self, name: &str) -> std::result::Result<ImagePair, MalformedPair> {
        let before = open_image(&self.input_dir.join(name))?;
        let after = open_image(&self.output_dir.join(name))?;
        Ok(ImagePair::new(before, after))
    }
}

fn open_image(path: &Path) -> std::result::Result<image::DynamicImage, MalformedPair> {
    image::open(path).map_err(|e| MalformedPair::Unreadable {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load the configured checkpoint and filter the configured directories.
pub fn run_filter(config: &FilterConfig, interrupt: &InterruptFlag) -> Result<FilterSummary> {
    let device = select_device(config.device)?;
    let classifier = ChangeClassifier::load(&config.checkpoint, &device)?;
    BatchFilter::new(&classifier, config)?.run(interrupt)
}
