//! Request, outcome and rejection types exchanged with the API layer.

use crate::domain::explanation::Explanation;
use crate::domain::features::FeatureError;
use crate::domain::model::Provenance;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Version token resolving to the newest available model.
pub const LATEST: &str = "latest";

fn latest() -> String {
    LATEST.to_string()
}

const MAX_VERSION_LEN: usize = 128;

/// Whether `token` can name a model version.
///
/// Tokens are spliced into file paths, so only ASCII alphanumerics, `.`,
/// `_` and `-` are allowed and the tokens `.` and `..` are refused.
pub fn is_version_token(token: &str) -> bool {
    !token.is_empty()
        && token.len() <= MAX_VERSION_LEN
        && token != "."
        && token != ".."
        && token
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

/// A prediction request as parsed by the API layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionRequest {
    pub features: BTreeMap<String, f64>,
    #[serde(default = "latest")]
    pub model_version: String,
    #[serde(default)]
    pub explain: bool,
}

impl PredictionRequest {
    pub fn new(features: BTreeMap<String, f64>) -> Self {
        Self {
            features,
            model_version: latest(),
            explain: false,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.model_version = version.into();
        self
    }

    pub fn with_explanation(mut self, explain: bool) -> Self {
        self.explain = explain;
        self
    }
}

/// The completed unit of work for one admitted, successful request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionOutcome {
    pub caller: String,
    pub features: BTreeMap<String, f64>,
    pub model_version: String,
    pub provenance: Provenance,
    pub prediction: f64,
    pub confidence: Option<f64>,
    pub explanation: Option<Explanation>,
    pub processing_time: Duration,
    pub timestamp: DateTime<Utc>,
}

/// Caller-facing failure category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectionKind {
    Validation,
    RateLimited,
    ModelUnavailable,
    PredictionFailed,
    PredictionTimeout,
}

impl RejectionKind {
    pub const ALL: [RejectionKind; 5] = [
        RejectionKind::Validation,
        RejectionKind::RateLimited,
        RejectionKind::ModelUnavailable,
        RejectionKind::PredictionFailed,
        RejectionKind::PredictionTimeout,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionKind::Validation => "validation_error",
            RejectionKind::RateLimited => "rate_limited",
            RejectionKind::ModelUnavailable => "model_unavailable",
            RejectionKind::PredictionFailed => "prediction_failed",
            RejectionKind::PredictionTimeout => "prediction_timeout",
        }
    }

    /// HTTP status hint for the API layer.
    pub fn http_status(&self) -> u16 {
        match self {
            RejectionKind::Validation => 422,
            RejectionKind::RateLimited => 429,
            RejectionKind::ModelUnavailable => 404,
            RejectionKind::PredictionFailed => 503,
            RejectionKind::PredictionTimeout => 504,
        }
    }
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a request ended before producing an outcome.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("invalid features: {0}")]
    Validation(#[from] FeatureError),

    #[error("rate limit exceeded: {limit} requests per {}s, {remaining} remaining", window.as_secs())]
    RateLimited {
        limit: u64,
        remaining: u64,
        window: Duration,
    },

    #[error("model version '{version}' is unavailable")]
    ModelUnavailable { version: String },

    #[error("prediction failed: {reason}")]
    PredictionFailed { reason: String },

    #[error("prediction timed out after {}ms", timeout.as_millis())]
    PredictionTimeout { timeout: Duration },
}

impl Rejection {
    pub fn kind(&self) -> RejectionKind {
        match self {
            Rejection::Validation(_) => RejectionKind::Validation,
            Rejection::RateLimited { .. } => RejectionKind::RateLimited,
            Rejection::ModelUnavailable { .. } => RejectionKind::ModelUnavailable,
            Rejection::PredictionFailed { .. } => RejectionKind::PredictionFailed,
            Rejection::PredictionTimeout { .. } => RejectionKind::PredictionTimeout,
        }
    }

    pub fn http_status(&self) -> u16 {
        self.kind().http_status()
    }
}
