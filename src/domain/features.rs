//! Input feature schema.
//!
//! The schema fixes the ordered list of features a model consumes. Requests
//! arrive as name → value maps; the schema validates them and lays the values
//! out in model order.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Description of a single required feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub description: String,
    /// Inclusive documented range, if any.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
}

impl FeatureSpec {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            range: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }
}

/// Reasons a feature map is rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FeatureError {
    #[error("missing required features: {}", .0.join(", "))]
    Missing(Vec<String>),
    #[error("feature {name} is not a finite number")]
    NonFinite { name: String },
    #[error("feature {name}={value} is outside [{min}, {max}]")]
    OutOfRange {
        name: String,
        value: f64,
        min: f64,
        max: f64,
    },
}

/// Ordered set of required features.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    features: Vec<FeatureSpec>,
    /// Reject values outside the documented ranges.
    #[serde(default)]
    enforce_ranges: bool,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureSpec>) -> Self {
        Self {
            features,
            enforce_ranges: false,
        }
    }

    /// Schema from bare names, without descriptions or ranges.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            names
                .into_iter()
                .map(|n| FeatureSpec::new(n, String::new()))
                .collect(),
        )
    }

    /// The five macroeconomic indicators the prediction models are trained on.
    pub fn economic_indicators() -> Self {
        Self::new(vec![
            FeatureSpec::new("gdp_growth_rate", "GDP growth rate as percentage")
                .with_range(-10.0, 20.0),
            FeatureSpec::new("inflation_rate", "Inflation rate as percentage").with_range(0.0, 50.0),
            FeatureSpec::new("usd_kes_rate", "USD to KES exchange rate").with_range(50.0, 200.0),
            FeatureSpec::new("cbr_rate", "Central Bank Rate as percentage").with_range(0.0, 30.0),
            FeatureSpec::new("trade_balance", "Trade balance in millions")
                .with_range(-100_000.0, 100_000.0),
        ])
    }

    pub fn with_range_enforcement(mut self, enabled: bool) -> Self {
        self.enforce_ranges = enabled;
        self
    }

    pub fn features(&self) -> &[FeatureSpec] {
        &self.features
    }

    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    /// Validate a request map and return its values in schema order.
    ///
    /// Extra keys are ignored. All missing names are reported together.
    pub fn vectorize(&self, values: &BTreeMap<String, f64>) -> Result<Vec<f64>, FeatureError> {
        let missing: Vec<String> = self
            .features
            .iter()
            .filter(|f| !values.contains_key(&f.name))
            .map(|f| f.name.clone())
            .collect();
        if !missing.is_empty() {
            return Err(FeatureError::Missing(missing));
        }

        let mut ordered = Vec::with_capacity(self.features.len());
        for spec in &self.features {
            let value = values[&spec.name];
            if !value.is_finite() {
                return Err(FeatureError::NonFinite {
                    name: spec.name.clone(),
                });
            }
            if self.enforce_ranges {
                if let Some((min, max)) = spec.range {
                    if value < min || value > max {
                        return Err(FeatureError::OutOfRange {
                            name: spec.name.clone(),
                            value,
                            min,
                            max,
                        });
                    }
                }
            }
            ordered.push(value);
        }
        Ok(ordered)
    }
}

impl Default for FeatureSchema {
    fn default() -> Self {
        Self::economic_indicators()
    }
}
