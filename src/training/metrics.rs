//! Training metrics and checkpoint selection

use std::fmt;

/// Size-weighted loss accumulated over the batches of one epoch
#[derive(Debug, Clone, Default)]
pub struct EpochLoss {
    /// Sum of `batch_loss * batch_size`
    pub weighted_sum: f64,
    /// Samples seen
    pub samples: usize,
    /// Number of batches accumulated
    pub batch_count: usize,
}

impl EpochLoss {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a batch mean loss
    pub fn update(&mut self, batch_loss: f32, batch_size: usize) {
        self.weighted_sum += batch_loss as f64 * batch_size as f64;
        self.samples += batch_size;
        self.batch_count += 1;
    }

    /// Average loss per sample
    pub fn avg_loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.weighted_sum / self.samples as f64
        }
    }
}

impl fmt::Display for EpochLoss {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4} ({} batches)", self.avg_loss(), self.batch_count)
    }
}

/// Per-epoch losses for a training run
#[derive(Debug, Clone, Default)]
pub struct TrainingHistory {
    pub train_losses: Vec<f64>,
    pub val_losses: Vec<f64>,
}

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_epoch(&mut self, train_loss: f64, val_loss: f64) {
        self.train_losses.push(train_loss);
        self.val_losses.push(val_loss);
    }

    pub fn epochs(&self) -> usize {
        self.train_losses.len()
    }

    pub fn final_train_loss(&self) -> Option<f64> {
        self.train_losses.last().copied()
    }
}

/// Keeps the snapshot taken at the lowest loss seen so far.
///
/// Only a strictly lower loss replaces the snapshot, so on ties the earliest
/// epoch wins. NaN never counts as an improvement.
#[derive(Debug, Clone)]
pub struct BestSnapshot<T> {
    best_loss: f64,
    best_epoch: Option<usize>,
    snapshot: Option<T>,
}

impl<T> Default for BestSnapshot<T> {
    fn default() -> Self {
        BestSnapshot {
            best_loss: f64::INFINITY,
            best_epoch: None,
            snapshot: None,
        }
    }
}

impl<T> BestSnapshot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offer an epoch's loss; `take` is only called when it improves.
    ///
    /// Returns whether the snapshot was replaced.
    pub fn offer(&mut self, epoch: usize, loss: f64, take: impl FnOnce() -> T) -> bool {
        if loss < self.best_loss {
            self.best_loss = loss;
            self.best_epoch = Some(epoch);
            self.snapshot = Some(take());
            true
        } else {
            false
        }
    }

    pub fn best_loss(&self) -> Option<f64> {
        self.best_epoch.map(|_| self.best_loss)
    }

    /// 1-based epoch of the retained snapshot
    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    pub fn into_snapshot(self) -> Option<T> {
        self.snapshot
    }
}
