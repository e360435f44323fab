//! In-process metric gauges with bounded history.
//!
//! The monitoring worker and the main cycle record samples here. The alert
//! engine reads the latest values through [`MetricSource`] and the anomaly
//! worker reads recent series.

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use vigil_types::MetricSource;

/// Default samples kept per metric.
pub const DEFAULT_METRIC_CAPACITY: usize = 1_000;

/// A recorded value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

/// Aggregate over the retained samples of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub latest: f64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub count: usize,
}

#[derive(Debug, Default)]
struct Series {
    samples: VecDeque<MetricSample>,
    total_recorded: u64,
}

/// Named gauges, each keeping its last `capacity` samples.
#[derive(Debug)]
pub struct MetricsRegistry {
    capacity: usize,
    series: RwLock<HashMap<String, Series>>,
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_METRIC_CAPACITY)
    }
}

impl MetricsRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: RwLock::new(HashMap::new()),
        }
    }

    /// Record a sample. Non-finite values are dropped.
    pub fn record(&self, name: &str, value: f64) {
        if !value.is_finite() {
            tracing::debug!(metric = name, value, "Dropping non-finite sample");
            return;
        }

        let mut series = self.series.write();
        let entry = series.entry(name.to_string()).or_default();
        if entry.samples.len() >= self.capacity {
            entry.samples.pop_front();
        }
        entry.samples.push_back(MetricSample {
            timestamp: Utc::now(),
            value,
        });
        entry.total_recorded += 1;
    }

    pub fn latest(&self, name: &str) -> Option<MetricSample> {
        self.series.read().get(name)?.samples.back().copied()
    }

    /// The last `n` values, oldest first.
    pub fn recent(&self, name: &str, n: usize) -> Vec<f64> {
        let series = self.series.read();
        let Some(entry) = series.get(name) else {
            return Vec::new();
        };
        let skip = entry.samples.len().saturating_sub(n);
        entry.samples.iter().skip(skip).map(|s| s.value).collect()
    }

    /// Samples ever recorded for `name`, including evicted ones.
    pub fn total_recorded(&self, name: &str) -> u64 {
        self.series
            .read()
            .get(name)
            .map(|s| s.total_recorded)
            .unwrap_or(0)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.series.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn summary(&self) -> BTreeMap<String, MetricSummary> {
        self.series
            .read()
            .iter()
            .filter_map(|(name, series)| {
                let latest = series.samples.back()?.value;
                let count = series.samples.len();
                let (min, max, sum) = series.samples.iter().fold(
                    (f64::INFINITY, f64::NEG_INFINITY, 0.0),
                    |(min, max, sum), s| (min.min(s.value), max.max(s.value), sum + s.value),
                );
                Some((
                    name.clone(),
                    MetricSummary {
                        latest,
                        min,
                        max,
                        mean: sum / count as f64,
                        count,
                    },
                ))
            })
            .collect()
    }
}

impl MetricSource for MetricsRegistry {
    fn get_metric(&self, name: &str) -> Option<f64> {
        self.latest(name).map(|s| s.value)
    }
}
