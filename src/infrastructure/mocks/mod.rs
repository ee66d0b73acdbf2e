//! Mock implementations for testing.
//!
//! This module provides test doubles for infrastructure adapters,
//! enabling controlled testing of application logic.

pub mod artifacts;
pub mod clock;
pub mod inference;
pub mod layer;
pub mod registry;
pub mod sink;
pub mod store;

pub use clock::MockClock;
pub use inference::{FailingInference, StallingInference};
pub use layer::{CapturedEvent, MockCaptureLayer};
pub use registry::MockRegistry;
pub use sink::RecordingSink;
pub use store::FailingWindowStore;
