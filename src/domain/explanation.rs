//! Rendered explanations and the summary sentence builder.

use crate::domain::model::StructureKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Contribution above which a feature is described as a strong driver.
pub const STRONG_THRESHOLD: f64 = 0.1;
/// Contribution above which a feature is described as a moderate driver.
pub const MODERATE_THRESHOLD: f64 = 0.05;
/// Number of contributions mentioned in the summary sentence.
pub const SUMMARY_ITEMS: usize = 3;

/// How contributions are computed for a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExplainerStrategy {
    /// Exact values from the split structure of a tree ensemble.
    StructureAware,
    /// Exact values from linear coefficients.
    Linear,
    /// Model-agnostic estimate from perturbed coalitions.
    BlackBoxSampling,
}

impl ExplainerStrategy {
    pub fn from_structure(kind: StructureKind) -> Self {
        match kind {
            StructureKind::Tree => ExplainerStrategy::StructureAware,
            StructureKind::Linear => ExplainerStrategy::Linear,
            StructureKind::Opaque => ExplainerStrategy::BlackBoxSampling,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExplainerStrategy::StructureAware => "structure-aware",
            ExplainerStrategy::Linear => "linear",
            ExplainerStrategy::BlackBoxSampling => "black-box-sampling",
        }
    }
}

impl fmt::Display for ExplainerStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of an explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureContribution {
    pub feature: String,
    pub value: f64,
    pub contribution: f64,
    pub magnitude: f64,
}

impl FeatureContribution {
    pub fn new(feature: impl Into<String>, value: f64, contribution: f64) -> Self {
        Self {
            feature: feature.into(),
            value,
            contribution,
            magnitude: contribution.abs(),
        }
    }
}

/// Per-prediction attribution, ranked by magnitude.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Explanation {
    pub contributions: Vec<FeatureContribution>,
    /// Expected model output the contributions are measured from.
    pub base_value: f64,
    /// Sum of all contributions, before truncation.
    pub total_impact: f64,
    pub summary: String,
    pub strategy: ExplainerStrategy,
}

/// Mean absolute contribution per feature over a batch of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalImportance {
    /// `(feature, mean |contribution|)`, most important first.
    pub features: Vec<(String, f64)>,
    pub most_important: Option<String>,
    pub samples_analyzed: usize,
}

/// Sort contributions by descending magnitude. Ties keep input order.
pub fn rank_contributions(contributions: &mut [FeatureContribution]) {
    contributions.sort_by(|a, b| b.magnitude.total_cmp(&a.magnitude));
}

/// `"gdp_growth_rate"` → `"Gdp Growth Rate"`.
pub fn readable_name(feature: &str) -> String {
    feature
        .split('_')
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn describe(contribution: &FeatureContribution) -> String {
    let strength = if contribution.magnitude > STRONG_THRESHOLD {
        "strongly"
    } else if contribution.magnitude > MODERATE_THRESHOLD {
        "moderately"
    } else {
        "slightly"
    };
    let direction = if contribution.contribution > 0.0 {
        "increases"
    } else {
        "decreases"
    };
    format!(
        "{} {strength} {direction} the prediction",
        readable_name(&contribution.feature)
    )
}

/// Natural-language summary of the leading contributions.
///
/// Expects `contributions` already ranked; only the first three are used.
pub fn summarize(contributions: &[FeatureContribution]) -> String {
    let parts: Vec<String> = contributions
        .iter()
        .take(SUMMARY_ITEMS)
        .map(describe)
        .collect();

    match parts.as_slice() {
        [] => "No explanation available.".to_string(),
        [one] => format!("{one}."),
        [first, second] => format!("{first} and {second}."),
        [init @ .., last] => format!("{}, and {last}.", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_from_structure() {
        assert_eq!(
            ExplainerStrategy::from_structure(StructureKind::Tree),
            ExplainerStrategy::StructureAware
        );
        assert_eq!(
            ExplainerStrategy::from_structure(StructureKind::Linear),
            ExplainerStrategy::Linear
        );
        assert_eq!(
            ExplainerStrategy::from_structure(StructureKind::Opaque),
            ExplainerStrategy::BlackBoxSampling
        );
        assert_eq!(
            ExplainerStrategy::BlackBoxSampling.to_string(),
            "black-box-sampling"
        );
    }

    #[test]
    fn test_readable_name() {
        assert_eq!(readable_name("gdp_growth_rate"), "Gdp Growth Rate");
        assert_eq!(readable_name("usd_kes_rate"), "Usd Kes Rate");
        assert_eq!(readable_name("a"), "A");
    }

    #[test]
    fn test_summary_empty() {
        assert_eq!(summarize(&[]), "No explanation available.");
    }

    #[test]
    fn test_summary_single() {
        let items = [FeatureContribution::new("cbr_rate", 1.0, -0.2)];
        assert_eq!(
            summarize(&items),
            "Cbr Rate strongly decreases the prediction."
        );
    }

    #[test]
    fn test_summary_pair() {
        let items = [
            FeatureContribution::new("inflation_rate", 1.0, 0.07),
            FeatureContribution::new("trade_balance", 1.0, 0.01),
        ];
        assert_eq!(
            summarize(&items),
            "Inflation Rate moderately increases the prediction and \
             Trade Balance slightly increases the prediction."
        );
    }

    #[test]
    fn test_summary_oxford_comma_uses_top_three() {
        let items = [
            FeatureContribution::new("a", 0.0, 0.5),
            FeatureContribution::new("b", 0.0, -0.06),
            FeatureContribution::new("c", 0.0, 0.0),
            FeatureContribution::new("d", 0.0, 0.0),
        ];
        assert_eq!(
            summarize(&items),
            "A strongly increases the prediction, B moderately decreases the prediction, \
             and C slightly decreases the prediction."
        );
    }

    #[test]
    fn test_thresholds_are_exclusive() {
        let at_strong = FeatureContribution::new("x", 0.0, STRONG_THRESHOLD);
        let at_moderate = FeatureContribution::new("x", 0.0, MODERATE_THRESHOLD);
        assert_eq!(describe(&at_strong), "X moderately increases the prediction");
        assert_eq!(describe(&at_moderate), "X slightly increases the prediction");
    }

    #[test]
    fn test_rank_by_magnitude() {
        let mut items = vec![
            FeatureContribution::new("small", 0.0, 0.1),
            FeatureContribution::new("big_negative", 0.0, -2.0),
            FeatureContribution::new("mid", 0.0, 1.0),
        ];
        rank_contributions(&mut items);
        let order: Vec<_> = items.iter().map(|c| c.feature.as_str()).collect();
        assert_eq!(order, ["big_negative", "mid", "small"]);
    }
}
