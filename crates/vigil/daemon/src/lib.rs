//! Vigil Daemon library
//!
//! Wires the cache, resilience, alert and anomaly crates into one process:
//! - Orchestrator lifecycle and background workers
//! - Collection cycle over external data providers
//! - Metrics registry feeding alert rules and anomaly detection
//! - Validation of provider data before caching
//! - Rolling log files and their retention
//! - Daemon configuration

pub mod config;
pub mod error;
pub mod logs;
pub mod metrics;
pub mod orchestrator;
pub mod probe;
pub mod provider;
pub mod validation;

pub use config::{CollectionTarget, DaemonConfig};
pub use error::{DaemonError, DaemonResult, DependencyError};
pub use metrics::{MetricSample, MetricSummary, MetricsRegistry};
pub use orchestrator::{
    classify_health, CycleReport, DetailedMetrics, Orchestrator, OrchestratorState, PipelineStats,
    SystemStatus,
};
pub use probe::{SystemProbe, SystemSample};
pub use provider::{DataProvider, FetchRequest, ProviderResponse, ProviderStats, ProviderStatus};
pub use validation::{DataValidator, DatasetRules, FieldRange, ValidationError, ValidationReport};
