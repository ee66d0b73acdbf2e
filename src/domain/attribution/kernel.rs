//! Model-agnostic Kernel SHAP.
//!
//! A coalition `z` is evaluated by replacing the features outside `z` with
//! background values and averaging the model output over the background rows.
//! Contributions are the solution of a weighted linear regression of coalition
//! values on coalition membership, with the Shapley kernel as weights and the
//! constraint that contributions sum to `f(x) − E[f]`.
//!
//! When every coalition fits in the sampling budget they are all enumerated
//! and the result equals the exact Shapley values. Otherwise coalitions are
//! sampled in proportion to the kernel from a seeded generator.

use super::{check_len, AttributionError};
use crate::domain::linalg;
use crate::domain::model::{LoadedModel, ModelId};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

/// Ridge term keeping sampled designs solvable.
const SAMPLED_RIDGE: f64 = 1e-9;

/// Sampling parameters for [`KernelExplainer`].
#[derive(Debug, Clone, PartialEq)]
pub struct KernelConfig {
    /// Maximum number of coalitions evaluated per explanation.
    pub max_coalitions: usize,
    /// Maximum background rows kept from the reference sample.
    pub max_background: usize,
    /// Seed for coalition sampling.
    pub seed: u64,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            max_coalitions: 2048,
            max_background: 10,
            seed: 0x5eed,
        }
    }
}

#[derive(Debug)]
pub struct KernelExplainer {
    model: Arc<LoadedModel>,
    background: Vec<Vec<f64>>,
    expected: Vec<f64>,
    config: KernelConfig,
}

impl KernelExplainer {
    /// Build against a background sample, evaluating the model once per row
    /// to fix the expected value.
    pub fn new(
        model: Arc<LoadedModel>,
        mut background: Vec<Vec<f64>>,
        config: KernelConfig,
    ) -> Result<Self, AttributionError> {
        background.truncate(config.max_background.max(1));
        if background.is_empty() {
            return Err(AttributionError::NoBackground);
        }
        let n = model.n_features();
        if let Some(row) = background.iter().find(|r| r.len() != n) {
            return Err(AttributionError::BadBackground {
                expected: n,
                actual: row.len(),
            });
        }

        let mut expected = vec![0.0; model.n_outputs()];
        for row in &background {
            for (e, v) in expected.iter_mut().zip(model.raw_output(row)?) {
                *e += v;
            }
        }
        let rows = background.len() as f64;
        expected.iter_mut().for_each(|e| *e /= rows);

        Ok(Self {
            model,
            background,
            expected,
            config,
        })
    }

    pub fn model_id(&self) -> ModelId {
        self.model.id()
    }

    pub fn expected_value(&self) -> &[f64] {
        &self.expected
    }

    pub fn shap_values(&self, x: &[f64]) -> Result<Vec<Vec<f64>>, AttributionError> {
        let m = self.model.n_features();
        check_len(m, x)?;
        let fx = self.model.raw_output(x)?;
        let outputs = fx.len();

        if m == 0 {
            return Ok(vec![Vec::new(); outputs]);
        }
        if m == 1 {
            return Ok((0..outputs)
                .map(|c| vec![fx[c] - self.expected[c]])
                .collect());
        }

        let (coalitions, weights, exact) = self.coalitions(m);
        let mut coalition_values = Vec::with_capacity(coalitions.len());
        for z in &coalitions {
            coalition_values.push(self.coalition_value(x, z)?);
        }

        // Eliminate the last feature through the efficiency constraint:
        // φ_last = Δ − Σ φ_i, leaving m − 1 free coefficients.
        let last = m - 1;
        let design: Vec<Vec<f64>> = coalitions
            .iter()
            .map(|z| {
                let z_last = f64::from(u8::from(z[last]));
                (0..last).map(|i| f64::from(u8::from(z[i])) - z_last).collect()
            })
            .collect();
        let ridge = if exact { 0.0 } else { SAMPLED_RIDGE };

        let mut values = Vec::with_capacity(outputs);
        for c in 0..outputs {
            let delta = fx[c] - self.expected[c];
            let targets: Vec<f64> = coalitions
                .iter()
                .zip(&coalition_values)
                .map(|(z, v)| v[c] - self.expected[c] - f64::from(u8::from(z[last])) * delta)
                .collect();
            let mut phi = linalg::weighted_least_squares(&design, &targets, &weights, ridge)
                .ok_or(AttributionError::Singular)?;
            let assigned: f64 = phi.iter().sum();
            phi.push(delta - assigned);
            values.push(phi);
        }
        Ok(values)
    }

    /// Coalitions to evaluate, their regression weights, and whether the set
    /// is exhaustive.
    fn coalitions(&self, m: usize) -> (Vec<Vec<bool>>, Vec<f64>, bool) {
        let exhaustive = m < 32 && (1usize << m) - 2 <= self.config.max_coalitions;
        if exhaustive {
            let mut coalitions = Vec::new();
            let mut weights = Vec::new();
            for mask in 1..(1usize << m) - 1 {
                let z: Vec<bool> = (0..m).map(|i| mask & (1 << i) != 0).collect();
                weights.push(kernel_weight(m, mask.count_ones() as usize));
                coalitions.push(z);
            }
            return (coalitions, weights, true);
        }

        // Sample coalition sizes proportionally to the total kernel mass of
        // each size, then a uniform subset of that size.
        let size_mass: Vec<f64> = (1..m)
            .map(|s| (m - 1) as f64 / (s as f64 * (m - s) as f64))
            .collect();
        let total: f64 = size_mass.iter().sum();
        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let budget = self.config.max_coalitions.max(2 * m);

        let mut coalitions = Vec::with_capacity(budget);
        for _ in 0..budget {
            let mut pick = rng.gen::<f64>() * total;
            let mut size = m - 1;
            for (i, mass) in size_mass.iter().enumerate() {
                if pick < *mass {
                    size = i + 1;
                    break;
                }
                pick -= mass;
            }
            let mut z = vec![false; m];
            for i in index::sample(&mut rng, m, size) {
                z[i] = true;
            }
            coalitions.push(z);
        }
        let weights = vec![1.0; coalitions.len()];
        (coalitions, weights, false)
    }

    /// Mean model output with coalition features from `x` and the rest from
    /// each background row.
    fn coalition_value(&self, x: &[f64], z: &[bool]) -> Result<Vec<f64>, AttributionError> {
        let mut mean = vec![0.0; self.expected.len()];
        let mut mixed = vec![0.0; x.len()];
        for row in &self.background {
            for i in 0..x.len() {
                mixed[i] = if z[i] { x[i] } else { row[i] };
            }
            for (acc, v) in mean.iter_mut().zip(self.model.raw_output(&mixed)?) {
                *acc += v;
            }
        }
        let rows = self.background.len() as f64;
        mean.iter_mut().for_each(|v| *v /= rows);
        Ok(mean)
    }
}

/// Shapley kernel weight for a coalition of `size` out of `m` features.
fn kernel_weight(m: usize, size: usize) -> f64 {
    let binomial = (0..size).fold(1.0, |acc, i| acc * (m - i) as f64 / (i + 1) as f64);
    (m - 1) as f64 / (binomial * size as f64 * (m - size) as f64)
}
