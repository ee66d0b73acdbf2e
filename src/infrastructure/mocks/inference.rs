//! Inference backends that misbehave on purpose.

use crate::application::ports::InferenceBackend;
use crate::domain::model::{LoadedModel, ModelError, Prediction};
use std::time::Duration;

/// Blocks the calling thread before predicting.
#[derive(Debug, Clone)]
pub struct StallingInference {
    delay: Duration,
}

impl StallingInference {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl InferenceBackend for StallingInference {
    fn infer(&self, model: &LoadedModel, features: &[f64]) -> Result<Prediction, ModelError> {
        std::thread::sleep(self.delay);
        model.predict(features)
    }
}

/// Fails every inference.
#[derive(Debug, Clone, Default)]
pub struct FailingInference;

impl InferenceBackend for FailingInference {
    fn infer(&self, _model: &LoadedModel, _features: &[f64]) -> Result<Prediction, ModelError> {
        Err(ModelError::Inference("model runtime crashed".to_string()))
    }
}
