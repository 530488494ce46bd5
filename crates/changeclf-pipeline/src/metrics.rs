//! Loss and accuracy accumulation for training epochs.
//!
//! Class 1 = changed, class 0 = unchanged. A prediction is `logit > 0`.

/// Running loss / accuracy / confusion counts over one split of one epoch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SplitStats {
    loss_sum: f64,
    count: usize,
    pub tp: usize,
    pub fp: usize,
    pub tn: usize,
    pub fn_count: usize,
}

impl SplitStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one example's loss, prediction and ground-truth label.
    pub fn record(&mut self, loss: f64, predicted: bool, label: bool) {
        self.loss_sum += loss;
        self.count += 1;
        match (predicted, label) {
            (true, true) => self.tp += 1,
            (true, false) => self.fp += 1,
            (false, false) => self.tn += 1,
            (false, true) => self.fn_count += 1,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Mean loss, 0 for an empty split.
    pub fn mean_loss(&self) -> f64 {
        if self.count > 0 {
            self.loss_sum / self.count as f64
        } else {
            0.0
        }
    }

    /// Fraction of correct predictions, 0 for an empty split.
    pub fn accuracy(&self) -> f64 {
        if self.count > 0 {
            (self.tp + self.tn) as f64 / self.count as f64
        } else {
            0.0
        }
    }

    pub fn precision(&self) -> f64 {
        if self.tp + self.fp > 0 {
            self.tp as f64 / (self.tp + self.fp) as f64
        } else {
            0.0
        }
    }

    pub fn recall(&self) -> f64 {
        if self.tp + self.fn_count > 0 {
            self.tp as f64 / (self.tp + self.fn_count) as f64
        } else {
            0.0
        }
    }
}

impl std::fmt::Display for SplitStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "acc={:.4} loss={:.4} prec={:.4} rec={:.4} (tp={} fp={} tn={} fn={})",
            self.accuracy(),
            self.mean_loss(),
            self.precision(),
            self.recall(),
            self.tp,
            self.fp,
            self.tn,
            self.fn_count,
        )
    }
}

/// Per-epoch metrics reported during training.
#[derive(Debug, Clone)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train: SplitStats,
    pub test: SplitStats,
}

impl EpochMetrics {
    pub fn test_accuracy(&self) -> f64 {
        self.test.accuracy()
    }

    pub fn train_accuracy(&self) -> f64 {
        self.train.accuracy()
    }

    pub fn test_loss(&self) -> f64 {
        self.test.mean_loss()
    }

    pub fn train_loss(&self) -> f64 {
        self.train.mean_loss()
    }
}

impl std::fmt::Display for EpochMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "epoch {}: test_acc={:.4} train_acc={:.4} test_loss={:.4} train_loss={:.4}",
            self.epoch,
            self.test_accuracy(),
            self.train_accuracy(),
            self.test_loss(),
            self.train_loss(),
        )
    }
}
