//! Exact contributions for linear models.
//!
//! With independent features, the Shapley value of feature `i` in a linear
//! model is `wᵢ · (xᵢ − μᵢ)` where `μ` is the reference input. The baseline is
//! the model output at `μ`.

use super::{check_len, AttributionError};
use crate::domain::explanation::ExplainerStrategy;
use crate::domain::linalg;
use crate::domain::model::{Estimator, LoadedModel, ModelId};

#[derive(Debug)]
pub struct LinearExplainer {
    model_id: ModelId,
    coefficients: Vec<Vec<f64>>,
    means: Vec<f64>,
    expected: Vec<f64>,
}

impl LinearExplainer {
    /// Build around the training means recorded in the artifact, falling back
    /// to the background mean and then to the origin.
    pub fn new(model: &LoadedModel, background: &[Vec<f64>]) -> Result<Self, AttributionError> {
        let linear = match model.estimator() {
            Estimator::Linear(m) => m,
            other => {
                return Err(AttributionError::UnsupportedModel {
                    strategy: ExplainerStrategy::Linear,
                    model: other.type_name(),
                })
            }
        };
        let n = model.n_features();
        if let Some(row) = background.iter().find(|r| r.len() != n) {
            return Err(AttributionError::BadBackground {
                expected: n,
                actual: row.len(),
            });
        }

        let means = linear
            .feature_means
            .clone()
            .or_else(|| linalg::column_means(background))
            .unwrap_or_else(|| vec![0.0; n]);

        let expected = linear
            .coefficients
            .iter()
            .zip(&linear.intercepts)
            .map(|(row, b)| b + row.iter().zip(&means).map(|(w, m)| w * m).sum::<f64>())
            .collect();

        Ok(Self {
            model_id: model.id(),
            coefficients: linear.coefficients.clone(),
            means,
            expected,
        })
    }

    pub fn model_id(&self) -> ModelId {
        self.model_id
    }

    pub fn expected_value(&self) -> &[f64] {
        &self.expected
    }

    pub fn shap_values(&self, x: &[f64]) -> Result<Vec<Vec<f64>>, AttributionError> {
        check_len(self.means.len(), x)?;
        Ok(self
            .coefficients
            .iter()
            .map(|row| {
                row.iter()
                    .zip(x.iter().zip(&self.means))
                    .map(|(w, (v, m))| w * (v - m))
                    .collect()
            })
            .collect())
    }
}
