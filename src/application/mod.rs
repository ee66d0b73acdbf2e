//! Application layer - orchestration of domain logic.
//!
//! This layer coordinates the domain logic and manages the runtime behavior:
//! - Sliding-window limiter (admission against a shared store)
//! - Model manager (tiered resolution with single-flight caching)
//! - Explainer manager (per-model attribution caches)
//! - Prediction gateway (the request state machine)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod circuit_breaker;
pub mod explainer;
pub mod gateway;
pub mod limiter;
pub mod metrics;
pub mod model_manager;
pub mod ports;
pub mod single_flight;
