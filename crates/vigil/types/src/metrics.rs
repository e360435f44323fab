//! Metric source contract.

use std::collections::HashMap;

use parking_lot::RwLock;

/// Read access to the latest value of a named metric.
///
/// `None` means the metric is currently unavailable. Callers treat that as
/// "nothing to evaluate", never as an error.
pub trait MetricSource: Send + Sync {
    fn get_metric(&self, name: &str) -> Option<f64>;
}

/// Fixed table of metric values, handy for tests and static setups.
#[derive(Debug, Default)]
pub struct StaticMetrics {
    values: RwLock<HashMap<String, f64>>,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, name: impl Into<String>, value: f64) {
        self.values.write().insert(name.into(), value);
    }

    pub fn remove(&self, name: &str) {
        self.values.write().remove(name);
    }
}

impl MetricSource for StaticMetrics {
    fn get_metric(&self, name: &str) -> Option<f64> {
        self.values.read().get(name).copied()
    }
}
