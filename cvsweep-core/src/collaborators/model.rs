//! Simulated trainable model.
//!
//! Performs no numerical optimisation. Its metrics are a deterministic
//! function of the number of epochs it has been trained for, which is stored
//! in its weights, so checkpoints, early stopping and resume behave the same
//! as with a real model.

use super::{Dataset, ModelBuilder, ModelSpec, ModelWeights, Prediction, TrainableModel};
use crate::error::{Result, SweepError};
use crate::training::EpochMetrics;

/// Builds [`SimulatedModel`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedModelBuilder {
    /// Validation loss starts rising after this many epochs.
    pub overfit_epoch: Option<usize>,
}

impl SimulatedModelBuilder {
    pub fn overfitting_after(epoch: usize) -> Self {
        Self {
            overfit_epoch: Some(epoch),
        }
    }
}

impl ModelBuilder for SimulatedModelBuilder {
    fn build(&self, spec: &ModelSpec, device: Option<&str>) -> Result<Box<dyn TrainableModel>> {
        if spec.class_names.is_empty() {
            return Err(SweepError::model("a model needs at least one class"));
        }
        tracing::debug!(
            model = %spec.model_name,
            classes = spec.class_names.len(),
            device = device.unwrap_or("cpu"),
            "Building simulated model"
        );
        Ok(Box::new(SimulatedModel {
            model_type: spec.model_name.clone(),
            n_classes: spec.class_names.len(),
            learning_rate: spec.hyperparameters.learning_rate,
            overfit_epoch: self.overfit_epoch,
            weights: ModelWeights(vec![0.0; spec.class_names.len() + 1]),
        }))
    }
}

/// A model whose first weight counts the epochs trained.
#[derive(Debug, Clone)]
pub struct SimulatedModel {
    model_type: String,
    n_classes: usize,
    learning_rate: f64,
    overfit_epoch: Option<usize>,
    weights: ModelWeights,
}

impl SimulatedModel {
    fn progress(&self) -> f64 {
        self.weights.0.first().copied().map_or(0.0, f64::from)
    }

    fn training_loss(progress: f64) -> f64 {
        1.0 / (1.0 + progress)
    }

    fn validation_loss(&self, progress: f64) -> f64 {
        match self.overfit_epoch {
            Some(turn) if progress > turn as f64 => {
                Self::training_loss(turn as f64) + 0.05 + 0.02 * (progress - turn as f64)
            }
            _ => Self::training_loss(progress) + 0.05,
        }
    }
}

impl TrainableModel for SimulatedModel {
    fn model_type(&self) -> &str {
        &self.model_type
    }

    fn train_epoch(
        &mut self,
        epoch: usize,
        training: &Dataset,
        validation: Option<&Dataset>,
    ) -> Result<EpochMetrics> {
        if training.is_empty() {
            return Err(SweepError::model("cannot train on an empty dataset"));
        }

        let progress = epoch as f64;
        if let Some(counter) = self.weights.0.first_mut() {
            *counter = epoch as f32;
        }
        for (class, weight) in self.weights.0.iter_mut().skip(1).enumerate() {
            *weight += (self.learning_rate * (class + 1) as f64) as f32;
        }

        let accuracy = progress / (progress + 1.0);
        Ok(EpochMetrics {
            loss: Self::training_loss(progress),
            accuracy,
            val_loss: validation.map(|_| self.validation_loss(progress)),
            val_accuracy: validation.map(|_| accuracy * 0.9),
        })
    }

    fn weights(&self) -> ModelWeights {
        self.weights.clone()
    }

    fn load_weights(&mut self, weights: ModelWeights) -> Result<()> {
        if weights.0.len() != self.n_classes + 1 {
            return Err(SweepError::model(format!(
                "expected {} weights, got {}",
                self.n_classes + 1,
                weights.0.len()
            )));
        }
        self.weights = weights;
        Ok(())
    }

    fn predict(&self, dataset: &Dataset) -> Result<Vec<Prediction>> {
        let trained = self.progress() >= 1.0;
        let confidence = (self.progress() / (self.progress() + 1.0)) as f32;
        Ok(dataset
            .labels()
            .map(|label| {
                let predicted = if trained { label } else { 0 };
                let mut scores = vec![(1.0 - confidence) / self.n_classes as f32; self.n_classes];
                if let Some(score) = scores.get_mut(predicted) {
                    *score += confidence;
                }
                Prediction {
                    label,
                    predicted,
                    scores,
                }
            })
            .collect())
    }
}
