//! Vigil Types - Shared vocabulary for the resilience and monitoring runtime
//!
//! Every Vigil crate speaks in terms of a handful of small types that live
//! here so the leaf crates (cache, resilience, alerts, anomaly) do not have
//! to depend on each other.
//!
//! ## Key Concepts
//!
//! - **MetricSource**: read-only access to the latest value of a named metric
//! - **FailureKind**: coarse error classification consumed by resilience layers
//! - **HealthStatus**: ordered health levels with worst-of aggregation

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod duration_serde;
pub mod failure;
pub mod health;
pub mod metrics;

pub use failure::{Classify, FailureKind};
pub use health::{ComponentHealth, HealthStatus};
pub use metrics::{MetricSource, StaticMetrics};
