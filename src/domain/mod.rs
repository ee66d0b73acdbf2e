//! Domain layer - pure serving logic with no I/O.
//!
//! This layer contains the core concepts and invariants of the serving core:
//! - Sliding-window admission policy and window entries
//! - Feature schema and validation
//! - Model artifacts, estimators and handles
//! - Shapley-value attribution and rendered explanations
//! - Prediction outcomes and the rejection taxonomy
//!
//! All types in this layer are pure and easily testable.

pub mod attribution;
pub mod explanation;
pub mod features;
pub mod linalg;
pub mod model;
pub mod outcome;
pub mod window;
