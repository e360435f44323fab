//! Configuration for vigil-daemon

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vigil_cache::CacheConfig;
use vigil_resilience::{BackoffStrategy, CircuitBreakerConfig, RetryConfig};

use crate::validation::DatasetRules;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub service: ServiceConfig,

    /// Worker scheduling
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Monitoring thresholds (percent)
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    #[serde(default)]
    pub cache: CacheSettings,

    /// Breaker and retry settings applied per provider
    #[serde(default)]
    pub resilience: ResilienceSettings,

    #[serde(default)]
    pub alerts: AlertSettings,

    #[serde(default)]
    pub anomaly: AnomalySettings,

    /// Data pulled by the main cycle
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Per-dataset validation rules
    #[serde(default)]
    pub validation: Vec<DatasetRules>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Service identity and storage location
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Source tag on alert payloads
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Directory for cache snapshots and model artifacts
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            data_dir: default_data_dir(),
        }
    }
}

/// Worker scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    #[serde(default = "default_alert_interval")]
    pub alert_interval_secs: u64,

    #[serde(default = "default_anomaly_interval")]
    pub anomaly_interval_secs: u64,

    /// Collection and maintenance cycle
    #[serde(default = "default_main_cycle_interval")]
    pub main_cycle_interval_secs: u64,

    /// Pause after a failed worker pass
    #[serde(default = "default_error_backoff")]
    pub error_backoff_secs: u64,

    /// Time each worker gets to stop
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    /// Age after which alerts and anomalies are pruned
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_secs: default_monitoring_interval(),
            alert_interval_secs: default_alert_interval(),
            anomaly_interval_secs: default_anomaly_interval(),
            main_cycle_interval_secs: default_main_cycle_interval(),
            error_backoff_secs: default_error_backoff(),
            stop_timeout_secs: default_stop_timeout(),
            retention_days: default_retention_days(),
        }
    }
}

impl WorkerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_secs(self.error_backoff_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// Monitoring thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_cpu_threshold")]
    pub cpu_percent: f64,

    #[serde(default = "default_memory_threshold")]
    pub memory_percent: f64,

    #[serde(default = "default_error_rate_threshold")]
    pub error_rate_percent: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            cpu_percent: default_cpu_threshold(),
            memory_percent: default_memory_threshold(),
            error_rate_percent: default_error_rate_threshold(),
        }
    }
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_size")]
    pub max_size: usize,

    #[serde(default = "default_cache_ttl")]
    pub default_ttl_secs: u64,

    /// Snapshot entries to `<data_dir>/cache.json`
    #[serde(default)]
    pub persist: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_size: default_cache_size(),
            default_ttl_secs: default_cache_ttl(),
            persist: false,
        }
    }
}

impl CacheSettings {
    pub fn to_cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_size: self.max_size,
            default_ttl: Duration::from_secs(self.default_ttl_secs),
            ..CacheConfig::default()
        }
    }
}

/// Resilience configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceSettings {
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_secs: u64,

    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

impl Default for ResilienceSettings {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_timeout(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

impl ResilienceSettings {
    pub fn circuit_breaker(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            recovery_timeout: Duration::from_secs(self.recovery_timeout_secs),
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry_max_attempts,
            strategy: BackoffStrategy::ExponentialJitter {
                base: Duration::from_millis(self.retry_base_delay_ms),
                max_delay: Duration::from_millis(self.retry_max_delay_ms),
            },
            ..RetryConfig::default()
        }
    }
}

/// Alert engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertSettings {
    /// Load the stock rule set
    #[serde(default = "default_true")]
    pub default_rules: bool,

    #[serde(default = "default_max_history")]
    pub max_history: usize,

    /// Oldest active alert is resolved once this many are open
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

impl Default for AlertSettings {
    fn default() -> Self {
        Self {
            default_rules: true,
            max_history: default_max_history(),
            max_active: default_max_active(),
        }
    }
}

/// Anomaly worker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySettings {
    /// Metrics fed to the anomaly engine
    #[serde(default = "default_tracked_metrics")]
    pub tracked_metrics: Vec<String>,

    /// Most recent samples analysed per metric
    #[serde(default = "default_sample_window")]
    pub sample_window: usize,

    /// Keep trained models under `<data_dir>/models`
    #[serde(default)]
    pub persist_models: bool,

    #[serde(default)]
    pub engine: vigil_anomaly::AnomalyEngineConfig,
}

impl Default for AnomalySettings {
    fn default() -> Self {
        Self {
            tracked_metrics: default_tracked_metrics(),
            sample_window: default_sample_window(),
            persist_models: false,
            engine: vigil_anomaly::AnomalyEngineConfig::default(),
        }
    }
}

/// Collection configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionConfig {
    #[serde(default)]
    pub targets: Vec<CollectionTarget>,
}

/// One provider call made every main cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub provider_id: String,
    pub endpoint: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    /// Validation rule set and cache namespace
    pub dataset: String,
    /// Cache TTL override
    #[serde(default)]
    pub cache_ttl_secs: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// JSON format
    #[serde(default)]
    pub json: bool,

    /// Directory for daily-rotated log files; stdout only when unset
    #[serde(default)]
    pub dir: Option<String>,

    /// Log file name prefix; also selects the files the retention sweep removes
    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            dir: None,
            file_prefix: default_log_file_prefix(),
        }
    }
}

// Default value helpers
fn default_true() -> bool {
    true
}

fn default_service_name() -> String {
    "vigil".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_monitoring_interval() -> u64 {
    60
}

fn default_alert_interval() -> u64 {
    30
}

fn default_anomaly_interval() -> u64 {
    120
}

fn default_main_cycle_interval() -> u64 {
    300
}

fn default_error_backoff() -> u64 {
    10
}

fn default_stop_timeout() -> u64 {
    5
}

fn default_retention_days() -> u32 {
    7
}

fn default_cpu_threshold() -> f64 {
    80.0
}

fn default_memory_threshold() -> f64 {
    85.0
}

fn default_error_rate_threshold() -> f64 {
    5.0
}

fn default_cache_size() -> usize {
    1000
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    60
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_base_delay() -> u64 {
    1000
}

fn default_retry_max_delay() -> u64 {
    60_000
}

fn default_max_history() -> usize {
    10_000
}

fn default_max_active() -> usize {
    1_000
}

fn default_tracked_metrics() -> Vec<String> {
    vec![
        "system.cpu_percent".to_string(),
        "system.memory_percent".to_string(),
        "pipeline.error_rate".to_string(),
    ]
}

fn default_sample_window() -> usize {
    500
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_file_prefix() -> String {
    "vigild.log".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then
    /// `VIGIL_`-prefixed environment variables (`VIGIL_WORKERS__ALERT_INTERVAL_SECS`).
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        // Add default configuration
        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        // Add file configuration if provided
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        // Nested keys are separated by a double underscore
        builder = builder.add_source(
            config::Environment::with_prefix("VIGIL")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.service.data_dir)
    }

    pub fn log_dir(&self) -> Option<PathBuf> {
        self.logging.dir.as_ref().map(PathBuf::from)
    }

    /// Point storage at `dir` and enable persistence.
    pub fn with_data_dir(mut self, dir: impl Into<String>) -> Self {
        self.service.data_dir = dir.into();
        self.cache.persist = true;
        self.anomaly.persist_models = true;
        self
    }
}
