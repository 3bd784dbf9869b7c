//! Running sums for one partition pass

use serde::{Deserialize, Serialize};

use crate::dataset::Partition;

/// Accumulates loss and correct predictions over the batches of one pass
#[derive(Debug, Clone, Default)]
pub struct RunningMetrics {
    loss_sum: f64,
    correct: usize,
    samples: usize,
    batches: usize,
}

impl RunningMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one batch; `mean_loss` is the batch-mean loss
    pub fn update(&mut self, mean_loss: f64, correct: usize, batch_size: usize) {
        self.loss_sum += mean_loss * batch_size as f64;
        self.correct += correct;
        self.samples += batch_size;
        self.batches += 1;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Mean running loss so far, for progress display
    pub fn mean_loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.loss_sum / self.samples as f64
        }
    }

    /// Close the pass, normalising by the partition size
    pub fn finish(self, partition: Partition, dataset_size: usize) -> PhaseMetrics {
        let denom = dataset_size.max(1) as f64;
        PhaseMetrics {
            partition,
            loss: self.loss_sum / denom,
            accuracy: self.correct as f64 / denom,
            correct: self.correct,
            samples: self.samples,
            batches: self.batches,
        }
    }
}

/// Loss and accuracy of one partition in one epoch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseMetrics {
    pub partition: Partition,
    pub loss: f64,
    pub accuracy: f64,
    pub correct: usize,
    pub samples: usize,
    pub batches: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loss_weighted_by_batch_size() {
        let mut metrics = RunningMetrics::new();
        metrics.update(1.0, 3, 4);
        metrics.update(4.0, 1, 2);

        assert_eq!(metrics.samples(), 6);
        assert!((metrics.mean_loss() - 2.0).abs() < 1e-12);

        let phase = metrics.finish(Partition::Training, 6);
        assert!((phase.loss - 2.0).abs() < 1e-12);
        assert!((phase.accuracy - 4.0 / 6.0).abs() < 1e-12);
        assert_eq!(phase.batches, 2);
    }

    #[test]
    fn test_empty_pass() {
        let phase = RunningMetrics::new().finish(Partition::Testing, 0);
        assert_eq!(phase.loss, 0.0);
        assert_eq!(phase.accuracy, 0.0);
    }
}
