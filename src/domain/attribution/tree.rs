//! Exact Shapley values for tree ensembles.
//!
//! The value of a feature coalition `S` for one tree is the expected tree
//! output when the features in `S` are fixed to the input and the others are
//! marginalized along the split structure, weighting each branch by the
//! training cover that reached it. Only features the tree actually splits on
//! can receive a contribution, so coalitions are enumerated over that subset.

use super::{check_len, shapley_weights, AttributionError};
use crate::domain::explanation::ExplainerStrategy;
use crate::domain::model::{DecisionTree, Estimator, LoadedModel, ModelId, TreeEnsemble, TreeNode};
use std::sync::Arc;

/// Largest number of distinct split features per tree handled exactly.
pub const MAX_TREE_FEATURES: usize = 20;

#[derive(Debug)]
pub struct TreeExplainer {
    model: Arc<LoadedModel>,
    expected: Vec<f64>,
    used_features: Vec<Vec<usize>>,
}

impl TreeExplainer {
    pub fn new(model: Arc<LoadedModel>) -> Result<Self, AttributionError> {
        let ensemble = ensemble(&model)?;
        let n_features = model.n_features();

        let mut used_features = Vec::with_capacity(ensemble.trees.len());
        for tree in &ensemble.trees {
            let used = tree.used_features();
            if used.len() > MAX_TREE_FEATURES {
                return Err(AttributionError::TooManyFeatures {
                    features: used.len(),
                    limit: MAX_TREE_FEATURES,
                });
            }
            used_features.push(used);
        }

        let weight = ensemble.tree_weight();
        let mut expected: Vec<f64> = (0..ensemble.n_outputs()).map(|c| ensemble.base(c)).collect();
        let nothing_fixed = vec![false; n_features];
        let origin = vec![0.0; n_features];
        for tree in &ensemble.trees {
            expected[tree.output] += weight * conditional_expectation(tree, &origin, &nothing_fixed, 0);
        }

        Ok(Self {
            model,
            expected,
            used_features,
        })
    }

    pub fn model_id(&self) -> ModelId {
        self.model.id()
    }

    pub fn expected_value(&self) -> &[f64] {
        &self.expected
    }

    pub fn shap_values(&self, x: &[f64]) -> Result<Vec<Vec<f64>>, AttributionError> {
        let n_features = self.model.n_features();
        check_len(n_features, x)?;
        let ensemble = ensemble(&self.model)?;
        let weight = ensemble.tree_weight();

        let mut values = vec![vec![0.0; n_features]; ensemble.n_outputs()];
        let mut fixed = vec![false; n_features];
        for (tree, used) in ensemble.trees.iter().zip(&self.used_features) {
            let phi = tree_shap(tree, x, used, &mut fixed);
            for (feature, contribution) in used.iter().zip(phi) {
                values[tree.output][*feature] += weight * contribution;
            }
        }
        Ok(values)
    }
}

fn ensemble(model: &LoadedModel) -> Result<&TreeEnsemble, AttributionError> {
    match model.estimator() {
        Estimator::TreeEnsemble(e) => Ok(e),
        other => Err(AttributionError::UnsupportedModel {
            strategy: ExplainerStrategy::StructureAware,
            model: other.type_name(),
        }),
    }
}

/// Shapley values of one tree over its used features.
///
/// `fixed` is scratch space sized to the full feature count; it is left all
/// `false` on return.
fn tree_shap(tree: &DecisionTree, x: &[f64], used: &[usize], fixed: &mut [bool]) -> Vec<f64> {
    let m = used.len();
    if m == 0 {
        return Vec::new();
    }

    let coalitions = 1usize << m;
    let mut value = Vec::with_capacity(coalitions);
    for mask in 0..coalitions {
        for (bit, feature) in used.iter().enumerate() {
            fixed[*feature] = mask & (1 << bit) != 0;
        }
        value.push(conditional_expectation(tree, x, fixed, 0));
    }
    for feature in used {
        fixed[*feature] = false;
    }

    let weights = shapley_weights(m);
    let mut phi = vec![0.0; m];
    for (j, p) in phi.iter_mut().enumerate() {
        let bit = 1 << j;
        for mask in (0..coalitions).filter(|mask| mask & bit == 0) {
            let size = mask.count_ones() as usize;
            *p += weights[size] * (value[mask | bit] - value[mask]);
        }
    }
    phi
}

/// Expected output of the subtree at `index` with `fixed` features taken
/// from `x` and the rest averaged over the training cover.
fn conditional_expectation(tree: &DecisionTree, x: &[f64], fixed: &[bool], index: usize) -> f64 {
    match &tree.nodes[index] {
        TreeNode::Leaf { value, .. } => *value,
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            ..
        } => {
            if fixed[*feature] {
                let next = if x[*feature] <= *threshold { *left } else { *right };
                return conditional_expectation(tree, x, fixed, next);
            }
            let left_cover = tree.nodes[*left].cover();
            let right_cover = tree.nodes[*right].cover();
            let left_value = conditional_expectation(tree, x, fixed, *left);
            let right_value = conditional_expectation(tree, x, fixed, *right);
            let total = left_cover + right_cover;
            if total > 0.0 {
                (left_cover * left_value + right_cover * right_value) / total
            } else {
                0.5 * (left_value + right_value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::{ModelArtifact, Objective};
    use std::collections::BTreeMap;

    fn leaf(value: f64, cover: f64) -> TreeNode {
        TreeNode::Leaf { value, cover }
    }

    fn split(feature: usize, threshold: f64, left: usize, right: usize, cover: f64) -> TreeNode {
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            cover,
        }
    }

    fn model(trees: Vec<DecisionTree>, base: Vec<f64>, n: usize) -> Arc<LoadedModel> {
        let artifact = ModelArtifact {
            name: "trees".into(),
            version: None,
            feature_names: (0..n).map(|i| format!("f{i}")).collect(),
            objective: Objective::Regression,
            estimator: Estimator::TreeEnsemble(TreeEnsemble {
                trees,
                base_score: base,
                average: false,
            }),
            metrics: BTreeMap::new(),
            trained_at: None,
            background: vec![],
        };
        Arc::new(LoadedModel::new(artifact).unwrap())
    }

    fn interaction_tree() -> DecisionTree {
        // f0 <= 0.5 ? (f1 <= 0.5 ? 1 : 3) : (f2 <= 0.5 ? 5 : 11)
        DecisionTree {
            output: 0,
            nodes: vec![
                split(0, 0.5, 1, 2, 100.0),
                split(1, 0.5, 3, 4, 40.0),
                split(2, 0.5, 5, 6, 60.0),
                leaf(1.0, 10.0),
                leaf(3.0, 30.0),
                leaf(5.0, 20.0),
                leaf(11.0, 40.0),
            ],
        }
    }

    #[test]
    fn test_single_split_values() {
        let tree = DecisionTree {
            output: 0,
            nodes: vec![split(0, 0.5, 1, 2, 10.0), leaf(-1.0, 4.0), leaf(2.0, 6.0)],
        };
        let explainer = TreeExplainer::new(model(vec![tree], vec![], 2)).unwrap();

        // E = 0.4 * -1 + 0.6 * 2 = 0.8
        assert!((explainer.expected_value()[0] - 0.8).abs() < 1e-12);
        let phi = explainer.shap_values(&[1.0, 7.0]).unwrap();
        assert!((phi[0][0] - 1.2).abs() < 1e-12);
        assert_eq!(phi[0][1], 0.0);
    }

    #[test]
    fn test_additivity_with_interactions() {
        let m = model(vec![interaction_tree(), interaction_tree()], vec![0.25], 4);
        let explainer = TreeExplainer::new(m.clone()).unwrap();

        for x in [
            [0.0, 0.0, 0.0, 9.0],
            [1.0, 0.0, 1.0, -3.0],
            [0.2, 0.9, 0.7, 0.0],
            [0.9, 0.1, 0.2, 1.0],
        ] {
            let phi = explainer.shap_values(&x).unwrap();
            let total: f64 = phi[0].iter().sum::<f64>() + explainer.expected_value()[0];
            let output = m.raw_output(&x).unwrap()[0];
            assert!((total - output).abs() < 1e-9, "x={x:?}");
            // f3 is never split on
            assert_eq!(phi[0][3], 0.0);
        }
    }

    #[test]
    fn test_multi_output_channels() {
        let mut second = interaction_tree();
        second.output = 1;
        let m = model(vec![interaction_tree(), second], vec![0.0, 1.0], 3);
        let explainer = TreeExplainer::new(m.clone()).unwrap();

        let x = [1.0, 0.0, 1.0];
        let phi = explainer.shap_values(&x).unwrap();
        let raw = m.raw_output(&x).unwrap();
        assert_eq!(phi.len(), 2);
        for c in 0..2 {
            let total: f64 = phi[c].iter().sum::<f64>() + explainer.expected_value()[c];
            assert!((total - raw[c]).abs() < 1e-9);
        }
    }

    #[test]
    fn test_wrong_length_rejected() {
        let explainer = TreeExplainer::new(model(vec![interaction_tree()], vec![], 3)).unwrap();
        assert_eq!(
            explainer.shap_values(&[1.0]),
            Err(AttributionError::DimensionMismatch {
                expected: 3,
                actual: 1
            })
        );
    }
}
