//! In-process inference.

use crate::application::ports::InferenceBackend;
use crate::domain::model::{LoadedModel, ModelError, Prediction};

/// Evaluates the decoded estimator directly on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalInference;

impl LocalInference {
    pub fn new() -> Self {
        Self
    }
}

impl InferenceBackend for LocalInference {
    fn infer(&self, model: &LoadedModel, features: &[f64]) -> Result<Prediction, ModelError> {
        model.predict(features)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::artifacts;

    #[test]
    fn test_delegates_to_model() {
        let model = LoadedModel::new(artifacts::linear("m", &["a", "b"], &[2.0, 1.0], 0.5)).unwrap();
        let prediction = LocalInference::new().infer(&model, &[1.0, 1.0]).unwrap();
        assert_eq!(prediction.value, 3.5);
        assert!(LocalInference::new().infer(&model, &[1.0]).is_err());
    }
}
