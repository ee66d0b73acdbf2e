//! Prediction sink that writes outcomes to the log.

use crate::application::ports::{PredictionSink, SinkError};
use crate::domain::outcome::PredictionOutcome;
use async_trait::async_trait;

/// Emits one structured `tracing` event per completed prediction.
///
/// The outcome is serialized as JSON under the `outcome` field, so a JSON
/// subscriber produces one self-contained record per prediction.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl PredictionSink for TracingSink {
    async fn record(&self, outcome: PredictionOutcome) -> Result<(), SinkError> {
        let json = serde_json::to_string(&outcome).map_err(|e| SinkError::Rejected(e.to_string()))?;
        tracing::info!(
            target: "investwise_serving::predictions",
            caller = %outcome.caller,
            version = %outcome.model_version,
            outcome = %json,
            "prediction recorded"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::Provenance;
    use crate::infrastructure::mocks::MockCaptureLayer;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    #[tokio::test]
    async fn test_outcome_logged_as_json() {
        let capture = MockCaptureLayer::new();
        let subscriber = tracing_subscriber::registry().with(capture.clone());
        let _guard = tracing::subscriber::set_default(subscriber);

        let outcome = PredictionOutcome {
            caller: "ip1".into(),
            features: BTreeMap::from([("cbr_rate".to_string(), 10.5)]),
            model_version: "v1".into(),
            provenance: Provenance::LocalFile,
            prediction: 0.42,
            confidence: None,
            explanation: None,
            processing_time: Duration::from_millis(3),
            timestamp: Utc::now(),
        };
        TracingSink::new().record(outcome).await.unwrap();

        let events = capture.get_captured();
        assert_eq!(events.len(), 1);
        let json = events[0].field("outcome").unwrap();
        let parsed: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(parsed["provenance"], "local-file");
        assert_eq!(parsed["prediction"], 0.42);
    }
}
