//! Per-epoch training history.

use serde::{Deserialize, Serialize};

/// Metrics reported by a model for one epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub loss: f64,
    pub accuracy: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_loss: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub val_accuracy: Option<f64>,
}

/// History of a training session, one entry per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    /// 1-based epoch numbers, aligned with the metric vectors.
    pub epochs: Vec<usize>,
    pub loss: Vec<f64>,
    pub accuracy: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub val_accuracy: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub best_loss: Option<f64>,
}

impl TrainingHistory {
    pub fn record_epoch(&mut self, epoch: usize, metrics: &EpochMetrics) {
        self.epochs.push(epoch);
        self.loss.push(metrics.loss);
        self.accuracy.push(metrics.accuracy);
        if let Some(vl) = metrics.val_loss {
            self.val_loss.push(vl);
        }
        if let Some(va) = metrics.val_accuracy {
            self.val_accuracy.push(va);
        }

        let check_loss = metrics.val_loss.unwrap_or(metrics.loss);
        if self.best_loss.is_none_or(|best| check_loss < best) {
            self.best_loss = Some(check_loss);
            self.best_epoch = Some(epoch);
        }
    }

    /// Number of epochs recorded.
    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(loss: f64, val_loss: Option<f64>) -> EpochMetrics {
        EpochMetrics {
            loss,
            accuracy: 0.5,
            val_loss,
            val_accuracy: val_loss.map(|_| 0.5),
        }
    }

    #[test]
    fn test_best_epoch_tracks_validation_loss() {
        let mut history = TrainingHistory::default();
        history.record_epoch(1, &metrics(0.5, Some(0.6)));
        history.record_epoch(2, &metrics(0.3, Some(0.4)));
        history.record_epoch(3, &metrics(0.2, Some(0.45)));
        assert_eq!(history.len(), 3);
        assert_eq!(history.best_epoch, Some(2));
        assert_eq!(history.best_loss, Some(0.4));
    }
}
