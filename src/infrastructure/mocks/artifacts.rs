//! Small artifacts of each estimator family.

use crate::domain::model::{
    DecisionTree, Estimator, LinearModel, ModelArtifact, NeighborsModel, Objective, TreeEnsemble,
    TreeNode,
};
use std::collections::BTreeMap;

fn names(features: &[&str]) -> Vec<String> {
    features.iter().map(|f| f.to_string()).collect()
}

fn base(name: &str, features: &[&str], estimator: Estimator) -> ModelArtifact {
    ModelArtifact {
        name: name.to_string(),
        version: None,
        feature_names: names(features),
        objective: Objective::Regression,
        estimator,
        metrics: BTreeMap::new(),
        trained_at: None,
        background: Vec::new(),
    }
}

/// `intercept + Σ coefficients[i] · x[i]` with zero training means.
pub fn linear(name: &str, features: &[&str], coefficients: &[f64], intercept: f64) -> ModelArtifact {
    base(
        name,
        features,
        Estimator::Linear(LinearModel {
            coefficients: vec![coefficients.to_vec()],
            intercepts: vec![intercept],
            feature_means: Some(vec![0.0; features.len()]),
        }),
    )
}

/// Two boosted trees splitting on the first two features.
///
/// Requires at least two features.
pub fn trees(name: &str, features: &[&str]) -> ModelArtifact {
    let leaf = |value: f64, cover: f64| TreeNode::Leaf { value, cover };
    let split = |feature: usize, threshold: f64, left: usize, right: usize, cover: f64| {
        TreeNode::Split {
            feature,
            threshold,
            left,
            right,
            cover,
        }
    };
    let first = DecisionTree {
        output: 0,
        nodes: vec![
            split(0, 2.0, 1, 2, 100.0),
            split(1, 5.0, 3, 4, 60.0),
            leaf(0.8, 40.0),
            leaf(-0.5, 35.0),
            leaf(0.25, 25.0),
        ],
    };
    let second = DecisionTree {
        output: 0,
        nodes: vec![split(1, 7.5, 1, 2, 100.0), leaf(0.1, 70.0), leaf(-0.3, 30.0)],
    };
    base(
        name,
        features,
        Estimator::TreeEnsemble(TreeEnsemble {
            trees: vec![first, second],
            base_score: vec![0.5],
            average: false,
        }),
    )
}

/// k-nearest-neighbours regressor over a handful of stored points.
pub fn neighbors(name: &str, features: &[&str]) -> ModelArtifact {
    let n = features.len();
    let points: Vec<Vec<f64>> = (0..6)
        .map(|i| (0..n).map(|j| ((i * 3 + j * 5) % 7) as f64).collect())
        .collect();
    let targets = (0..6).map(|i| i as f64 * 0.5 - 1.0).collect();
    base(
        name,
        features,
        Estimator::Neighbors(NeighborsModel {
            k: 2,
            points,
            targets,
        }),
    )
}

/// Linear model over the five economic indicators.
pub fn economic_linear(name: &str) -> ModelArtifact {
    let mut artifact = linear(
        name,
        &[
            "gdp_growth_rate",
            "inflation_rate",
            "usd_kes_rate",
            "cbr_rate",
            "trade_balance",
        ],
        &[0.4, -0.3, -0.01, -0.2, 0.05],
        2.0,
    );
    artifact.metrics = BTreeMap::from([("r2".to_string(), 0.82)]);
    artifact
}
