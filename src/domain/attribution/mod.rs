//! Shapley-value attribution of a single model output to its input features.
//!
//! Three explainers are provided, one per model structure:
//!
//! - [`TreeExplainer`]: exact values from the split structure of tree ensembles
//! - [`LinearExplainer`]: exact values from coefficients around the mean input
//! - [`KernelExplainer`]: model-agnostic estimate by weighted regression over
//!   feature coalitions evaluated against a background sample
//!
//! Every explainer is additive: for each output channel, the contributions
//! sum to the model's raw output minus the explainer's expected value.

pub mod kernel;
pub mod linear;
pub mod tree;

pub use kernel::{KernelConfig, KernelExplainer};
pub use linear::LinearExplainer;
pub use tree::TreeExplainer;

use crate::domain::explanation::ExplainerStrategy;
use crate::domain::model::{LoadedModel, ModelError, ModelId};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised while building an explainer or computing contributions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AttributionError {
    #[error("expected {expected} feature values, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("{strategy} explainer cannot handle a {model} model")]
    UnsupportedModel {
        strategy: ExplainerStrategy,
        model: &'static str,
    },
    #[error("a tree uses {features} features, more than the exact limit of {limit}")]
    TooManyFeatures { features: usize, limit: usize },
    #[error("no background data available")]
    NoBackground,
    #[error("background row has {actual} values, expected {expected}")]
    BadBackground { expected: usize, actual: usize },
    #[error("regression over coalitions is singular")]
    Singular,
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Contributions for one input row.
#[derive(Debug, Clone, PartialEq)]
pub struct Attribution {
    /// Expected model output per channel (the baseline).
    pub expected: Vec<f64>,
    /// Contributions indexed `[channel][feature]`.
    pub values: Vec<Vec<f64>>,
}

impl Attribution {
    /// Contributions of the first output channel.
    pub fn first_channel(&self) -> (&[f64], f64) {
        (
            self.values.first().map(Vec::as_slice).unwrap_or(&[]),
            self.expected.first().copied().unwrap_or(0.0),
        )
    }
}

/// A constructed explanation engine bound to one model object.
#[derive(Debug)]
pub enum Explainer {
    Tree(TreeExplainer),
    Linear(LinearExplainer),
    Kernel(KernelExplainer),
}

impl Explainer {
    /// Build the explainer matching `strategy` for `model`.
    ///
    /// `background` is only consulted by strategies that need a reference
    /// sample.
    pub fn build(
        strategy: ExplainerStrategy,
        model: Arc<LoadedModel>,
        background: Vec<Vec<f64>>,
        kernel: &KernelConfig,
    ) -> Result<Self, AttributionError> {
        match strategy {
            ExplainerStrategy::StructureAware => Ok(Explainer::Tree(TreeExplainer::new(model)?)),
            ExplainerStrategy::Linear => {
                Ok(Explainer::Linear(LinearExplainer::new(&model, &background)?))
            }
            ExplainerStrategy::BlackBoxSampling => Ok(Explainer::Kernel(KernelExplainer::new(
                model,
                background,
                kernel.clone(),
            )?)),
        }
    }

    pub fn strategy(&self) -> ExplainerStrategy {
        match self {
            Explainer::Tree(_) => ExplainerStrategy::StructureAware,
            Explainer::Linear(_) => ExplainerStrategy::Linear,
            Explainer::Kernel(_) => ExplainerStrategy::BlackBoxSampling,
        }
    }

    pub fn model_id(&self) -> ModelId {
        match self {
            Explainer::Tree(e) => e.model_id(),
            Explainer::Linear(e) => e.model_id(),
            Explainer::Kernel(e) => e.model_id(),
        }
    }

    pub fn expected_value(&self) -> &[f64] {
        match self {
            Explainer::Tree(e) => e.expected_value(),
            Explainer::Linear(e) => e.expected_value(),
            Explainer::Kernel(e) => e.expected_value(),
        }
    }

    /// Contributions for one input row.
    pub fn shap_values(&self, x: &[f64]) -> Result<Attribution, AttributionError> {
        let values = match self {
            Explainer::Tree(e) => e.shap_values(x)?,
            Explainer::Linear(e) => e.shap_values(x)?,
            Explainer::Kernel(e) => e.shap_values(x)?,
        };
        Ok(Attribution {
            expected: self.expected_value().to_vec(),
            values,
        })
    }
}

pub(crate) fn check_len(expected: usize, x: &[f64]) -> Result<(), AttributionError> {
    if x.len() != expected {
        return Err(AttributionError::DimensionMismatch {
            expected,
            actual: x.len(),
        });
    }
    Ok(())
}

/// `s! (m - s - 1)! / m!` for every coalition size `s` in `0..m`.
pub(crate) fn shapley_weights(m: usize) -> Vec<f64> {
    let mut factorial = vec![1.0_f64; m + 1];
    for i in 1..=m {
        factorial[i] = factorial[i - 1] * i as f64;
    }
    (0..m)
        .map(|s| factorial[s] * factorial[m - s - 1] / factorial[m])
        .collect()
}
