//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Window stores (in-memory DashMap, Redis sorted sets)
//! - Model registries (filesystem, HTTP) and artifact codecs
//! - Inference, prediction sink and subscriber setup
//! - Configuration and the gateway builder

pub mod artifact;
pub mod builder;
pub mod clock;
pub mod config;
pub mod fs_registry;
pub mod inference;
pub mod memory_store;
pub mod sink;
pub mod telemetry;

#[cfg(feature = "http-registry")]
pub mod http_registry;

#[cfg(feature = "redis-storage")]
pub mod redis_store;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides controllable test doubles for the
/// ports the serving core depends on.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// investwise-serving = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
