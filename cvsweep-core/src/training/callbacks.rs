//! Training callbacks: early stopping and periodic checkpointing.

use crate::collaborators::{ModelWeights, TrainableModel};
use crate::error::Result;
use crate::training::history::EpochMetrics;

/// Action a callback can request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    Continue,
    Stop,
    Checkpoint,
}

/// Trait for training callbacks.
pub trait EpochCallback: Send {
    /// Called at the end of each epoch with the 1-based epoch number.
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        model: &dyn TrainableModel,
    ) -> CallbackAction;

    /// Called once after the last epoch, whether or not training stopped early.
    fn on_train_end(&mut self, _model: &mut dyn TrainableModel) -> Result<()> {
        Ok(())
    }
}

/// Early stopping on validation loss, restoring the best weights when it
/// triggers.
#[derive(Debug, Clone)]
pub struct EarlyStoppingCallback {
    pub patience: usize,
    pub min_delta: f64,
    counter: usize,
    best_loss: Option<f64>,
    best_epoch: Option<usize>,
    best_weights: Option<ModelWeights>,
    stopped_epoch: Option<usize>,
}

impl EarlyStoppingCallback {
    pub fn new(patience: usize, min_delta: f64) -> Self {
        Self {
            patience,
            min_delta,
            counter: 0,
            best_loss: None,
            best_epoch: None,
            best_weights: None,
            stopped_epoch: None,
        }
    }

    /// Epoch at which training was stopped, if it was.
    pub fn stopped_epoch(&self) -> Option<usize> {
        self.stopped_epoch
    }

    pub fn best_epoch(&self) -> Option<usize> {
        self.best_epoch
    }

    /// Returns whether `loss` improved on the best seen so far, and the
    /// action to take.
    fn observe(&mut self, epoch: usize, loss: f64) -> (bool, CallbackAction) {
        let improved = match self.best_loss {
            None => true,
            Some(best) => loss < best - self.min_delta,
        };
        if improved {
            self.best_loss = Some(loss);
            self.best_epoch = Some(epoch);
            self.counter = 0;
            return (true, CallbackAction::Continue);
        }

        self.counter += 1;
        if self.counter >= self.patience {
            self.stopped_epoch = Some(epoch);
            (false, CallbackAction::Stop)
        } else {
            (false, CallbackAction::Continue)
        }
    }
}

impl EpochCallback for EarlyStoppingCallback {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        metrics: &EpochMetrics,
        model: &dyn TrainableModel,
    ) -> CallbackAction {
        // Folds without validation data never stop early.
        let Some(val_loss) = metrics.val_loss else {
            return CallbackAction::Continue;
        };
        let (improved, action) = self.observe(epoch, val_loss);
        if improved {
            self.best_weights = Some(model.weights());
        }
        action
    }

    fn on_train_end(&mut self, model: &mut dyn TrainableModel) -> Result<()> {
        if self.stopped_epoch.is_none() {
            return Ok(());
        }
        if let Some(weights) = self.best_weights.take() {
            tracing::info!(
                stopped_epoch = ?self.stopped_epoch,
                best_epoch = ?self.best_epoch,
                "Early stopping triggered, restoring best weights"
            );
            model.load_weights(weights)?;
        }
        Ok(())
    }
}

/// Requests a checkpoint every `frequency` epochs and at the final epoch.
#[derive(Debug, Clone)]
pub struct CheckpointCallback {
    pub frequency: usize,
    pub final_epoch: usize,
}

impl CheckpointCallback {
    pub fn new(frequency: usize, final_epoch: usize) -> Self {
        Self {
            frequency: frequency.max(1),
            final_epoch,
        }
    }

    pub fn is_due(&self, epoch: usize) -> bool {
        epoch % self.frequency == 0 || epoch == self.final_epoch
    }
}

impl EpochCallback for CheckpointCallback {
    fn on_epoch_end(
        &mut self,
        epoch: usize,
        _metrics: &EpochMetrics,
        _model: &dyn TrainableModel,
    ) -> CallbackAction {
        if self.is_due(epoch) {
            CallbackAction::Checkpoint
        } else {
            CallbackAction::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{Dataset, Prediction};

    struct Fixed(ModelWeights);

    impl TrainableModel for Fixed {
        fn model_type(&self) -> &str {
            "fixed"
        }

        fn train_epoch(
            &mut self,
            _epoch: usize,
            _training: &Dataset,
            _validation: Option<&Dataset>,
        ) -> Result<EpochMetrics> {
            unreachable!()
        }

        fn weights(&self) -> ModelWeights {
            self.0.clone()
        }

        fn load_weights(&mut self, weights: ModelWeights) -> Result<()> {
            self.0 = weights;
            Ok(())
        }

        fn predict(&self, _dataset: &Dataset) -> Result<Vec<Prediction>> {
            Ok(Vec::new())
        }
    }

    fn val(loss: f64) -> EpochMetrics {
        EpochMetrics {
            loss,
            accuracy: 0.0,
            val_loss: Some(loss),
            val_accuracy: Some(0.0),
        }
    }

    #[test]
    fn test_early_stopping() {
        let model = Fixed(ModelWeights::default());
        let mut cb = EarlyStoppingCallback::new(3, 0.01);
        assert_eq!(cb.on_epoch_end(1, &val(0.5), &model), CallbackAction::Continue); // best=0.5
        assert_eq!(cb.on_epoch_end(2, &val(0.4), &model), CallbackAction::Continue); // best=0.4
        assert_eq!(cb.on_epoch_end(3, &val(0.4), &model), CallbackAction::Continue); // counter=1
        assert_eq!(cb.on_epoch_end(4, &val(0.4), &model), CallbackAction::Continue); // counter=2
        assert_eq!(cb.on_epoch_end(5, &val(0.4), &model), CallbackAction::Stop); // counter=3
        assert_eq!(cb.stopped_epoch(), Some(5));
        assert_eq!(cb.best_epoch(), Some(2));
    }

    #[test]
    fn test_early_stopping_restores_best_weights() {
        let mut model = Fixed(ModelWeights(vec![1.0]));
        let mut cb = EarlyStoppingCallback::new(1, 0.0);
        cb.on_epoch_end(1, &val(0.3), &model);
        model.0 = ModelWeights(vec![2.0]);
        assert_eq!(cb.on_epoch_end(2, &val(0.9), &model), CallbackAction::Stop);

        cb.on_train_end(&mut model).unwrap();
        assert_eq!(model.0, ModelWeights(vec![1.0]));
    }

    #[test]
    fn test_no_restore_without_stop() {
        let mut model = Fixed(ModelWeights(vec![1.0]));
        let mut cb = EarlyStoppingCallback::new(5, 0.0);
        cb.on_epoch_end(1, &val(0.3), &model);
        model.0 = ModelWeights(vec![2.0]);
        cb.on_epoch_end(2, &val(0.4), &model);

        cb.on_train_end(&mut model).unwrap();
        assert_eq!(model.0, ModelWeights(vec![2.0]));
    }

    #[test]
    fn test_without_validation_never_stops() {
        let model = Fixed(ModelWeights::default());
        let mut cb = EarlyStoppingCallback::new(1, 0.0);
        let metrics = EpochMetrics {
            loss: 1.0,
            accuracy: 0.0,
            val_loss: None,
            val_accuracy: None,
        };
        for epoch in 1..10 {
            assert_eq!(cb.on_epoch_end(epoch, &metrics, &model), CallbackAction::Continue);
        }
    }

    #[test]
    fn test_checkpoint_schedule() {
        let cb = CheckpointCallback::new(3, 7);
        let due: Vec<usize> = (1..=7).filter(|&e| cb.is_due(e)).collect();
        assert_eq!(due, vec![3, 6, 7]);
    }
}
