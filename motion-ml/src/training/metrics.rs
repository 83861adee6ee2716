//! Metrics tracked across a training run.

use serde::{Deserialize, Serialize};

/// What one completed epoch looked like. Mutable during callback dispatch:
/// the validation callback fills in the `val_*` fields for the callbacks
/// ordered after it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EpochMetrics {
    /// Zero-based epoch index.
    pub epoch: usize,
    pub train_loss: f64,
    pub val_loss: Option<f64>,
    /// Video-level accuracy, present on validation epochs.
    pub val_accuracy: Option<f64>,
    pub learning_rate: f64,
}

/// Run-level metric history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub epochs_completed: usize,
    pub loss_history: Vec<f64>,
    /// `(epoch, accuracy)` for every validation pass.
    pub val_accuracy_history: Vec<(usize, f64)>,
    pub best_epoch: Option<usize>,
    pub best_val_accuracy: Option<f64>,
    pub total_training_time_secs: f64,
}

impl TrainingMetrics {
    pub fn record(&mut self, epoch: &EpochMetrics) {
        self.loss_history.push(epoch.train_loss);
        self.epochs_completed += 1;
        if let Some(accuracy) = epoch.val_accuracy {
            self.val_accuracy_history.push((epoch.epoch, accuracy));
            if self.best_val_accuracy.is_none_or(|best| accuracy > best) {
                self.best_val_accuracy = Some(accuracy);
                self.best_epoch = Some(epoch.epoch);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epoch(epoch: usize, loss: f64, val: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            epoch,
            train_loss: loss,
            val_loss: val.map(|_| loss),
            val_accuracy: val,
            learning_rate: 1e-3,
        }
    }

    #[test]
    fn test_best_tracks_highest_accuracy() {
        let mut metrics = TrainingMetrics::default();
        metrics.record(&epoch(0, 1.0, None));
        metrics.record(&epoch(1, 0.8, Some(0.4)));
        metrics.record(&epoch(2, 0.6, Some(0.7)));
        metrics.record(&epoch(3, 0.5, Some(0.6)));
        assert_eq!(metrics.epochs_completed, 4);
        assert_eq!(metrics.best_epoch, Some(2));
        assert_eq!(metrics.best_val_accuracy, Some(0.7));
        assert_eq!(metrics.val_accuracy_history.len(), 3);
    }
}
