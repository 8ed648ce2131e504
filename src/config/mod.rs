//! Table-driven policy configuration for the Attendance Point Engine.
//!
//! Severity thresholds, point weights, and expiration durations live here
//! rather than at call sites, so the policy can be tuned without touching
//! the classifier or the expiration services.

mod loader;
mod types;

pub use types::{PointWeights, PolicyConfig};
