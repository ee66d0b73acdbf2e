//! Prediction sink that records outcomes in memory.

use crate::application::ports::{PredictionSink, SinkError};
use crate::domain::outcome::PredictionOutcome;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RecordingSink {
    outcomes: Mutex<Vec<PredictionOutcome>>,
    fail: bool,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every outcome after recording it.
    pub fn failing() -> Self {
        Self {
            outcomes: Mutex::default(),
            fail: true,
        }
    }

    pub fn outcomes(&self) -> Vec<PredictionOutcome> {
        self.outcomes
            .lock()
            .expect("RecordingSink mutex poisoned")
            .clone()
    }

    pub fn len(&self) -> usize {
        self.outcomes.lock().expect("RecordingSink mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `n` outcomes were recorded, up to `timeout`.
    ///
    /// Outcomes are recorded from a spawned task, so tests poll for them.
    pub async fn wait_for(&self, n: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.len() >= n {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.len() >= n
    }
}

#[async_trait]
impl PredictionSink for RecordingSink {
    async fn record(&self, outcome: PredictionOutcome) -> Result<(), SinkError> {
        self.outcomes
            .lock()
            .expect("RecordingSink mutex poisoned")
            .push(outcome);
        if self.fail {
            return Err(SinkError::Unavailable("database offline".to_string()));
        }
        Ok(())
    }
}
