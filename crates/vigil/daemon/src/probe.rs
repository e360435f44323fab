//! Host resource sampling.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::DaemonResult;

/// Resource usage in percent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    #[serde(default)]
    pub disk_percent: Option<f64>,
}

/// Samples host resources for the monitoring worker.
///
/// Optional: without a probe the monitoring pass only reports pipeline
/// and cache metrics.
#[async_trait]
pub trait SystemProbe: Send + Sync {
    async fn sample(&self) -> DaemonResult<SystemSample>;
}
