//! Model artifacts and loaded models.
//!
//! An artifact is the serialized output of the training pipeline: metadata
//! plus one of three estimator families. The family decides how a model can
//! be explained, so it is captured once at load time as a [`StructureKind`]
//! on the [`ModelHandle`].

use crate::domain::linalg;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// How the raw outputs of an estimator map to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Objective {
    /// Single continuous output.
    #[default]
    Regression,
    /// Per-class margins; one margin means binary logistic.
    Classification,
}

/// One node of a binary decision tree.
///
/// Samples with `x[feature] <= threshold` go left. `cover` is the number (or
/// weight) of training samples that reached the node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
        #[serde(default)]
        cover: f64,
    },
    Leaf {
        value: f64,
        #[serde(default)]
        cover: f64,
    },
}

impl TreeNode {
    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Split { cover, .. } | TreeNode::Leaf { cover, .. } => *cover,
        }
    }
}

/// A decision tree stored as a node array rooted at index 0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTree {
    /// Output channel this tree contributes to.
    #[serde(default)]
    pub output: usize,
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    /// Evaluate the tree for one input row.
    pub fn evaluate(&self, x: &[f64]) -> f64 {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value, .. } => return *value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                    ..
                } => {
                    index = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Distinct features referenced by split nodes, ascending.
    pub fn used_features(&self) -> Vec<usize> {
        let mut features: Vec<usize> = self
            .nodes
            .iter()
            .filter_map(|n| match n {
                TreeNode::Split { feature, .. } => Some(*feature),
                TreeNode::Leaf { .. } => None,
            })
            .collect();
        features.sort_unstable();
        features.dedup();
        features
    }
}

/// Additive ensemble of regression trees (random forest or boosting).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEnsemble {
    pub trees: Vec<DecisionTree>,
    /// Constant added to each output channel.
    #[serde(default)]
    pub base_score: Vec<f64>,
    /// Divide the tree sum by the tree count (forest averaging).
    #[serde(default)]
    pub average: bool,
}

impl TreeEnsemble {
    pub fn n_outputs(&self) -> usize {
        let by_trees = self
            .trees
            .iter()
            .map(|t| t.output.saturating_add(1))
            .max()
            .unwrap_or(1);
        by_trees.max(self.base_score.len()).max(1)
    }

    /// Weight applied to each tree's contribution.
    pub fn tree_weight(&self) -> f64 {
        if self.average && !self.trees.is_empty() {
            1.0 / self.trees.len() as f64
        } else {
            1.0
        }
    }

    pub fn base(&self, output: usize) -> f64 {
        self.base_score.get(output).copied().unwrap_or(0.0)
    }

    fn raw(&self, x: &[f64]) -> Vec<f64> {
        let weight = self.tree_weight();
        let mut out: Vec<f64> = (0..self.n_outputs()).map(|c| self.base(c)).collect();
        for tree in &self.trees {
            out[tree.output] += weight * tree.evaluate(x);
        }
        out
    }
}

/// Linear model: one coefficient row and intercept per output channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub coefficients: Vec<Vec<f64>>,
    pub intercepts: Vec<f64>,
    /// Training means of the inputs, the reference point for explanations.
    #[serde(default)]
    pub feature_means: Option<Vec<f64>>,
}

impl LinearModel {
    /// Ordinary least squares fit with an intercept.
    ///
    /// Returns `None` if the design matrix is degenerate.
    pub fn fit(rows: &[Vec<f64>], targets: &[f64]) -> Option<Self> {
        let design: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| std::iter::once(1.0).chain(r.iter().copied()).collect())
            .collect();
        let beta = linalg::weighted_least_squares(&design, targets, &vec![1.0; rows.len()], 0.0)?;
        Some(Self {
            coefficients: vec![beta[1..].to_vec()],
            intercepts: vec![beta[0]],
            feature_means: linalg::column_means(rows),
        })
    }

    fn raw(&self, x: &[f64]) -> Vec<f64> {
        self.coefficients
            .iter()
            .zip(&self.intercepts)
            .map(|(row, b)| b + row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>())
            .collect()
    }
}

/// k-nearest-neighbours regressor; opaque to structural explainers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborsModel {
    pub k: usize,
    pub points: Vec<Vec<f64>>,
    pub targets: Vec<f64>,
}

impl NeighborsModel {
    fn raw(&self, x: &[f64]) -> Vec<f64> {
        let mut distances: Vec<(f64, f64)> = self
            .points
            .iter()
            .zip(&self.targets)
            .map(|(p, t)| {
                let d: f64 = p.iter().zip(x).map(|(a, b)| (a - b) * (a - b)).sum();
                (d, *t)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0));
        let k = self.k.min(distances.len()).max(1);
        let sum: f64 = distances.iter().take(k).map(|(_, t)| t).sum();
        vec![sum / k as f64]
    }
}

/// The estimator families the serving core can load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Estimator {
    TreeEnsemble(TreeEnsemble),
    Linear(LinearModel),
    Neighbors(NeighborsModel),
}

impl Estimator {
    pub fn structure(&self) -> StructureKind {
        match self {
            Estimator::TreeEnsemble(_) => StructureKind::Tree,
            Estimator::Linear(_) => StructureKind::Linear,
            Estimator::Neighbors(_) => StructureKind::Opaque,
        }
    }

    pub fn n_outputs(&self) -> usize {
        match self {
            Estimator::TreeEnsemble(e) => e.n_outputs(),
            Estimator::Linear(m) => m.coefficients.len(),
            Estimator::Neighbors(_) => 1,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Estimator::TreeEnsemble(_) => "TreeEnsemble",
            Estimator::Linear(_) => "LinearModel",
            Estimator::Neighbors(_) => "NeighborsModel",
        }
    }
}

/// Structural class of a model, fixed at load time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructureKind {
    Tree,
    Linear,
    Opaque,
}

/// Reasons an artifact is rejected at load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArtifactInvalid {
    #[error("artifact declares no features")]
    NoFeatures,
    #[error("artifact has {actual} features, expected {expected}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("feature {position} is '{actual}', expected '{expected}'")]
    FeatureOrder {
        position: usize,
        expected: String,
        actual: String,
    },
    #[error("tree {tree} is empty")]
    EmptyTree { tree: usize },
    #[error("tree {tree} writes output {output}, ensemble has {limit}")]
    BadOutput {
        tree: usize,
        output: usize,
        limit: usize,
    },
    #[error("base score {index} is not finite")]
    BadBaseScore { index: usize },
    #[error("tree {tree} node {node}: {reason}")]
    BadNode {
        tree: usize,
        node: usize,
        reason: String,
    },
    #[error("linear model: {0}")]
    BadLinear(String),
    #[error("neighbours model: {0}")]
    BadNeighbors(String),
    #[error("background row {row} has {actual} values, expected {expected}")]
    BadBackground {
        row: usize,
        expected: usize,
        actual: usize,
    },
    #[error("background row {row} has a non-finite value")]
    NonFiniteBackground { row: usize },
}

fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// Serialized model produced by training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub objective: Objective,
    pub estimator: Estimator,
    /// Evaluation metrics recorded at training time.
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
    #[serde(default)]
    pub trained_at: Option<DateTime<Utc>>,
    /// Representative training rows, used as explanation background.
    #[serde(default)]
    pub background: Vec<Vec<f64>>,
}

impl ModelArtifact {
    pub fn n_features(&self) -> usize {
        self.feature_names.len()
    }

    /// Check internal consistency so a loaded model can never index out of
    /// bounds at inference time.
    pub fn validate(&self) -> Result<(), ArtifactInvalid> {
        let n = self.n_features();
        if n == 0 {
            return Err(ArtifactInvalid::NoFeatures);
        }

        match &self.estimator {
            Estimator::TreeEnsemble(ensemble) => validate_trees(ensemble, n)?,
            Estimator::Linear(model) => {
                if model.coefficients.is_empty() {
                    return Err(ArtifactInvalid::BadLinear("no coefficient rows".into()));
                }
                if model.coefficients.len() != model.intercepts.len() {
                    return Err(ArtifactInvalid::BadLinear(format!(
                        "{} coefficient rows but {} intercepts",
                        model.coefficients.len(),
                        model.intercepts.len()
                    )));
                }
                if let Some(row) = model.coefficients.iter().find(|r| r.len() != n) {
                    return Err(ArtifactInvalid::BadLinear(format!(
                        "coefficient row has {} values, expected {}",
                        row.len(),
                        n
                    )));
                }
                if !model.coefficients.iter().all(|r| all_finite(r)) {
                    return Err(ArtifactInvalid::BadLinear("non-finite coefficient".into()));
                }
                if !all_finite(&model.intercepts) {
                    return Err(ArtifactInvalid::BadLinear("non-finite intercept".into()));
                }
                if let Some(means) = &model.feature_means {
                    if means.len() != n {
                        return Err(ArtifactInvalid::BadLinear(format!(
                            "{} feature means, expected {}",
                            means.len(),
                            n
                        )));
                    }
                    if !all_finite(means) {
                        return Err(ArtifactInvalid::BadLinear("non-finite feature mean".into()));
                    }
                }
            }
            Estimator::Neighbors(model) => {
                if model.k == 0 {
                    return Err(ArtifactInvalid::BadNeighbors("k must be at least 1".into()));
                }
                if model.points.is_empty() || model.points.len() != model.targets.len() {
                    return Err(ArtifactInvalid::BadNeighbors(format!(
                        "{} points for {} targets",
                        model.points.len(),
                        model.targets.len()
                    )));
                }
                if model.points.iter().any(|p| p.len() != n) {
                    return Err(ArtifactInvalid::BadNeighbors(
                        "point dimension does not match feature count".into(),
                    ));
                }
                if !model.points.iter().all(|p| all_finite(p)) || !all_finite(&model.targets) {
                    return Err(ArtifactInvalid::BadNeighbors("non-finite point or target".into()));
                }
                if self.objective != Objective::Regression {
                    return Err(ArtifactInvalid::BadNeighbors(
                        "only regression is supported".into(),
                    ));
                }
            }
        }

        for (row, values) in self.background.iter().enumerate() {
            if values.len() != n {
                return Err(ArtifactInvalid::BadBackground {
                    row,
                    expected: n,
                    actual: values.len(),
                });
            }
            if !all_finite(values) {
                return Err(ArtifactInvalid::NonFiniteBackground { row });
            }
        }
        Ok(())
    }

    /// A statistically trivial linear model fitted on seeded synthetic data.
    ///
    /// The target is the plain sum of the inputs plus small noise, which keeps
    /// the service answering when no real artifact can be found.
    pub fn synthetic(name: &str, feature_names: Vec<String>, rows: usize, seed: u64) -> Option<Self> {
        let n = feature_names.len();
        let mut rng = StdRng::seed_from_u64(seed);
        let x: Vec<Vec<f64>> = (0..rows)
            .map(|_| (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect())
            .collect();
        let y: Vec<f64> = x
            .iter()
            .map(|r| r.iter().sum::<f64>() + rng.gen_range(-0.1..0.1))
            .collect();

        let model = LinearModel::fit(&x, &y)?;
        let predictions: Vec<f64> = x.iter().map(|r| model.raw(r)[0]).collect();
        let metrics = BTreeMap::from([
            ("r2".to_string(), r_squared(&y, &predictions)),
            ("train_rows".to_string(), rows as f64),
        ]);

        Some(Self {
            name: name.to_string(),
            version: None,
            feature_names,
            objective: Objective::Regression,
            estimator: Estimator::Linear(model),
            metrics,
            trained_at: Some(Utc::now()),
            background: x.into_iter().take(10).collect(),
        })
    }
}

fn validate_trees(ensemble: &TreeEnsemble, n_features: usize) -> Result<(), ArtifactInvalid> {
    if let Some(index) = ensemble.base_score.iter().position(|b| !b.is_finite()) {
        return Err(ArtifactInvalid::BadBaseScore { index });
    }
    // Every output channel is seeded by a base score or written by a tree.
    let limit = ensemble.base_score.len().max(ensemble.trees.len());
    for (t, tree) in ensemble.trees.iter().enumerate() {
        if tree.nodes.is_empty() {
            return Err(ArtifactInvalid::EmptyTree { tree: t });
        }
        if tree.output >= limit {
            return Err(ArtifactInvalid::BadOutput {
                tree: t,
                output: tree.output,
                limit,
            });
        }
        for (i, node) in tree.nodes.iter().enumerate() {
            let bad = |reason: String| ArtifactInvalid::BadNode {
                tree: t,
                node: i,
                reason,
            };
            let cover = node.cover();
            if !cover.is_finite() || cover < 0.0 {
                return Err(bad(format!("invalid cover {cover}")));
            }
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    threshold,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(bad(format!("feature {feature} out of range")));
                    }
                    // Children must come after their parent, which rules out cycles.
                    if *left <= i || *right <= i || *left >= tree.nodes.len() || *right >= tree.nodes.len() {
                        return Err(bad(format!("invalid children {left}/{right}")));
                    }
                    if !threshold.is_finite() {
                        return Err(bad("non-finite threshold".into()));
                    }
                }
                TreeNode::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(bad("non-finite leaf value".into()));
                    }
                }
            }
        }
    }
    Ok(())
}

fn r_squared(actual: &[f64], predicted: &[f64]) -> f64 {
    let mean = actual.iter().sum::<f64>() / actual.len().max(1) as f64;
    let ss_tot: f64 = actual.iter().map(|y| (y - mean).powi(2)).sum();
    let ss_res: f64 = actual
        .iter()
        .zip(predicted)
        .map(|(y, p)| (y - p).powi(2))
        .sum();
    if ss_tot == 0.0 {
        0.0
    } else {
        1.0 - ss_res / ss_tot
    }
}

/// Errors raised while invoking a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("expected {expected} features, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("model produced a non-finite output")]
    NonFinite,
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Process-unique identity of a loaded model object.
///
/// Every load mints a fresh id, so a model reloaded under the same version is
/// a different identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModelId(u64);

static NEXT_MODEL_ID: AtomicU64 = AtomicU64::new(1);

impl ModelId {
    pub fn next() -> Self {
        Self(NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "model#{}", self.0)
    }
}

/// Result of a single inference.
#[derive(Debug, Clone, PartialEq)]
pub struct Prediction {
    pub value: f64,
    /// Highest class probability, for classifiers only.
    pub confidence: Option<f64>,
}

/// A validated artifact ready for inference.
#[derive(Debug)]
pub struct LoadedModel {
    id: ModelId,
    artifact: ModelArtifact,
}

impl LoadedModel {
    /// Validate an artifact and assign it a fresh identity.
    pub fn new(artifact: ModelArtifact) -> Result<Self, ArtifactInvalid> {
        artifact.validate()?;
        Ok(Self {
            id: ModelId::next(),
            artifact,
        })
    }

    pub fn id(&self) -> ModelId {
        self.id
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    pub fn estimator(&self) -> &Estimator {
        &self.artifact.estimator
    }

    pub fn n_features(&self) -> usize {
        self.artifact.n_features()
    }

    pub fn n_outputs(&self) -> usize {
        self.artifact.estimator.n_outputs()
    }

    pub fn structure(&self) -> StructureKind {
        self.artifact.estimator.structure()
    }

    /// Raw output channels (margins for classifiers) for one input row.
    pub fn raw_output(&self, x: &[f64]) -> Result<Vec<f64>, ModelError> {
        if x.len() != self.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features(),
                actual: x.len(),
            });
        }
        let out = match &self.artifact.estimator {
            Estimator::TreeEnsemble(e) => e.raw(x),
            Estimator::Linear(m) => m.raw(x),
            Estimator::Neighbors(m) => m.raw(x),
        };
        if out.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite);
        }
        Ok(out)
    }

    /// Predict for one input row, applying the objective's link.
    pub fn predict(&self, x: &[f64]) -> Result<Prediction, ModelError> {
        let raw = self.raw_output(x)?;
        match self.artifact.objective {
            Objective::Regression => Ok(Prediction {
                value: raw[0],
                confidence: None,
            }),
            Objective::Classification => {
                let probabilities = class_probabilities(&raw);
                let (class, p) = probabilities
                    .iter()
                    .enumerate()
                    .max_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, p)| (i, *p))
                    .ok_or(ModelError::NonFinite)?;
                Ok(Prediction {
                    value: class as f64,
                    confidence: Some(p),
                })
            }
        }
    }

    /// Rows usable as an explanation background, capped at `max_rows`.
    pub fn reference_rows(&self, max_rows: usize) -> Vec<Vec<f64>> {
        let rows = if !self.artifact.background.is_empty() {
            &self.artifact.background
        } else if let Estimator::Neighbors(m) = &self.artifact.estimator {
            &m.points
        } else {
            return Vec::new();
        };
        rows.iter().take(max_rows).cloned().collect()
    }
}

/// Softmax over margins; a single margin is treated as binary logistic.
pub fn class_probabilities(margins: &[f64]) -> Vec<f64> {
    if margins.len() == 1 {
        let p = 1.0 / (1.0 + (-margins[0]).exp());
        return vec![1.0 - p, p];
    }
    let max = margins.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = margins.iter().map(|m| (m - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

/// Which resolution tier produced a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Provenance {
    Registry,
    LocalFile,
    SyntheticStub,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Registry => "registry",
            Provenance::LocalFile => "local-file",
            Provenance::SyntheticStub => "synthetic-stub",
        }
    }

    /// Whether the model came from the last-resort tier.
    pub fn is_degraded(&self) -> bool {
        matches!(self, Provenance::SyntheticStub)
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resident, invocable model for one version token.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    pub version: String,
    pub model: Arc<LoadedModel>,
    pub loaded_at: DateTime<Utc>,
    pub provenance: Provenance,
    pub structure: StructureKind,
}

impl ModelHandle {
    pub fn new(version: impl Into<String>, model: LoadedModel, provenance: Provenance) -> Self {
        Self::shared(version, Arc::new(model), provenance)
    }

    /// A handle over a model that other handles may already serve.
    pub fn shared(
        version: impl Into<String>,
        model: Arc<LoadedModel>,
        provenance: Provenance,
    ) -> Self {
        let structure = model.structure();
        Self {
            version: version.into(),
            model,
            loaded_at: Utc::now(),
            provenance,
            structure,
        }
    }

    pub fn id(&self) -> ModelId {
        self.model.id()
    }

    pub fn same_model(&self, other: &ModelHandle) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}
