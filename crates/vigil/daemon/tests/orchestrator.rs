//! End-to-end tests for the orchestrator: collection through the resilience
//! layers, monitoring, alerting, anomaly detection and worker lifecycle.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use vigil_alerts::{AlertChannelKind, AlertSeverity, MemoryChannel};
use vigil_anomaly::{Algorithm, AnomalyConfig};
use vigil_daemon::{
    CollectionTarget, DaemonConfig, DaemonError, DaemonResult, DataProvider, DatasetRules,
    FetchRequest, FieldRange, Orchestrator, OrchestratorState, ProviderResponse, SystemProbe,
    SystemSample,
};
use vigil_resilience::CircuitState;
use vigil_types::HealthStatus;

/// Provider whose responses are switched by the test.
struct ScriptedProvider {
    healthy: AtomicBool,
    payload: Value,
    calls: AtomicU32,
}

impl ScriptedProvider {
    fn new(healthy: bool, payload: Value) -> Arc<Self> {
        Arc::new(Self {
            healthy: AtomicBool::new(healthy),
            payload,
            calls: AtomicU32::new(0),
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "weather"
    }

    async fn fetch(&self, _request: &FetchRequest) -> ProviderResponse {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.healthy.load(Ordering::SeqCst) {
            ProviderResponse::success(self.payload.clone())
        } else {
            ProviderResponse::error("503 service unavailable")
        }
    }
}

/// Probe reporting fixed values; panics on its first `panics` samples.
struct FixedProbe {
    cpu: f64,
    memory: f64,
    panics: u32,
    calls: AtomicU32,
}

impl FixedProbe {
    fn new(cpu: f64, memory: f64) -> Arc<Self> {
        Arc::new(Self {
            cpu,
            memory,
            panics: 0,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl SystemProbe for FixedProbe {
    async fn sample(&self) -> DaemonResult<SystemSample> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.panics {
            panic!("probe exploded");
        }
        Ok(SystemSample {
            cpu_percent: self.cpu,
            memory_percent: self.memory,
            disk_percent: None,
        })
    }
}

fn weather_config() -> DaemonConfig {
    let mut config = DaemonConfig::default();
    config.resilience.retry_base_delay_ms = 10;
    config.resilience.retry_max_delay_ms = 50;
    config.collection.targets = vec![CollectionTarget {
        provider_id: "weather".to_string(),
        endpoint: "/current".to_string(),
        params: [("city".to_string(), "Porto".to_string())].into_iter().collect(),
        dataset: "weather".to_string(),
        cache_ttl_secs: None,
    }];
    config.validation = vec![DatasetRules {
        dataset: "weather".to_string(),
        required_fields: vec!["city".to_string(), "temp_c".to_string()],
        ranges: vec![FieldRange {
            field: "temp_c".to_string(),
            min: Some(-90.0),
            max: Some(60.0),
        }],
    }];
    config
}

fn started(config: DaemonConfig, provider: Arc<ScriptedProvider>) -> Arc<Orchestrator> {
    let orchestrator = Orchestrator::new(config);
    orchestrator.register_provider(provider);
    orchestrator.initialize().unwrap();
    orchestrator
}

#[tokio::test(start_paused = true)]
async fn sustained_outage_opens_circuit_and_serves_cached_data() {
    let provider = ScriptedProvider::new(true, json!({"city": "Porto", "temp_c": 18.5}));
    let orchestrator = started(weather_config(), provider.clone());

    let report = orchestrator.run_collection_cycle().await;
    assert_eq!(report.collected, 1);
    assert_eq!(provider.calls(), 1);

    provider.healthy.store(false, Ordering::SeqCst);
    for _ in 0..5 {
        let report = orchestrator.run_collection_cycle().await;
        assert_eq!(report.fallbacks, 1);
        assert_eq!(report.collected, 0);
    }
    // Each failing cycle exhausts three attempts
    assert_eq!(provider.calls(), 16);

    let breaker = orchestrator.coordinator().circuit_breaker("weather").unwrap();
    assert_eq!(breaker.state(), CircuitState::Open);

    // Open circuit: the provider is not called, the cache answers
    let report = orchestrator.run_collection_cycle().await;
    assert_eq!(report.fallbacks, 1);
    assert_eq!(provider.calls(), 16);

    let cached = orchestrator
        .cache()
        .get("weather:/current?city=Porto")
        .unwrap();
    assert_eq!(cached["temp_c"], 18.5);

    let stats = &orchestrator.provider_stats()["weather"];
    assert_eq!(stats.requests, 7);
    assert_eq!(stats.successes, 1);
    assert_eq!(stats.failures, 6);
    assert_eq!(stats.fallbacks, 6);

    let status = orchestrator.status();
    assert_eq!(status.stats.fallback_responses, 6);
    assert_eq!(status.stats.cycles_completed, 7);
    assert!(status.health >= HealthStatus::Degraded);
}

#[tokio::test(start_paused = true)]
async fn outage_without_cache_reports_failures() {
    let provider = ScriptedProvider::new(false, Value::Null);
    let orchestrator = started(weather_config(), provider.clone());

    for _ in 0..5 {
        let report = orchestrator.run_collection_cycle().await;
        assert_eq!(report.failed, 1);
        assert_eq!(report.fallbacks, 0);
    }
    assert_eq!(provider.calls(), 15);

    let report = orchestrator.run_collection_cycle().await;
    assert_eq!(report.failed, 1);
    assert_eq!(provider.calls(), 15);

    let stats = orchestrator.status().stats;
    assert_eq!(stats.total_requests, 6);
    assert_eq!(stats.failed_requests, 6);
    assert_eq!(stats.successful_requests, 0);
    assert!(orchestrator.provider_stats()["weather"].last_error.is_some());
}

#[tokio::test]
async fn invalid_data_is_not_cached() {
    let provider = ScriptedProvider::new(true, json!({"city": "Mars", "temp_c": 480.0}));
    let orchestrator = started(weather_config(), provider);

    let report = orchestrator.run_collection_cycle().await;
    assert_eq!(report.rejected, 1);
    assert!(orchestrator.cache().is_empty());

    let stats = orchestrator.status().stats;
    assert_eq!(stats.validation_failures, 1);
    assert_eq!(stats.failed_requests, 1);
}

#[tokio::test]
async fn monitoring_classifies_health_and_feeds_alerts() {
    let orchestrator = Orchestrator::new(DaemonConfig::default());
    orchestrator.initialize().unwrap();
    let dashboard = Arc::new(MemoryChannel::new(AlertChannelKind::Dashboard));
    orchestrator.register_channel(dashboard.clone());

    orchestrator.set_probe(FixedProbe::new(40.0, 50.0));
    let health = orchestrator.run_monitoring_pass().await.unwrap();
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(orchestrator.run_alert_pass().await, 0);

    orchestrator.set_probe(FixedProbe::new(90.0, 50.0));
    let health = orchestrator.run_monitoring_pass().await.unwrap();
    assert_eq!(health.status, HealthStatus::Warning);
    assert_eq!(orchestrator.metrics().latest("system.cpu_percent").unwrap().value, 90.0);

    assert_eq!(orchestrator.run_alert_pass().await, 1);
    let active = orchestrator.alerts().get_active_alerts();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].rule_name, "High CPU Usage");
    assert_eq!(active[0].severity, AlertSeverity::Warning);
    assert_eq!(dashboard.delivered().len(), 1);

    // Cooldown suppresses the next pass
    assert_eq!(orchestrator.run_alert_pass().await, 0);

    orchestrator.set_probe(FixedProbe::new(99.0, 50.0));
    let health = orchestrator.run_monitoring_pass().await.unwrap();
    assert_eq!(health.status, HealthStatus::Unhealthy);
    assert_eq!(orchestrator.health(), HealthStatus::Unhealthy);
    assert_eq!(orchestrator.status().stats.alerts_triggered, 1);
}

#[tokio::test]
async fn anomaly_pass_only_reports_new_points() {
    let mut config = DaemonConfig::default();
    config.anomaly.tracked_metrics = vec!["queue.depth".to_string()];
    config.anomaly.engine.metrics.insert(
        "queue.depth".to_string(),
        AnomalyConfig::default().with_algorithm(Algorithm::ZScore),
    );
    let orchestrator = Orchestrator::new(config);
    orchestrator.initialize().unwrap();

    assert_eq!(orchestrator.run_anomaly_pass().await.unwrap(), 0);

    for _ in 0..99 {
        orchestrator.metrics().record("queue.depth", 50.0);
    }
    orchestrator.metrics().record("queue.depth", 500.0);

    assert_eq!(orchestrator.run_anomaly_pass().await.unwrap(), 1);
    // Nothing new recorded since
    assert_eq!(orchestrator.run_anomaly_pass().await.unwrap(), 0);

    let history = orchestrator.anomaly().get_anomaly_history(Some("queue.depth"), 10);
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].value, 500.0);
    assert_eq!(orchestrator.status().stats.anomalies_detected, 1);
}

#[tokio::test(start_paused = true)]
async fn workers_survive_panics_and_stop_cleanly() {
    let mut config = DaemonConfig::default();
    config.workers.monitoring_interval_secs = 1;
    config.workers.error_backoff_secs = 1;
    let orchestrator = Orchestrator::new(config);

    let probe = Arc::new(FixedProbe {
        cpu: 10.0,
        memory: 10.0,
        panics: 2,
        calls: AtomicU32::new(0),
    });
    orchestrator.set_probe(probe.clone());

    assert!(matches!(
        orchestrator.start(),
        Err(DaemonError::InvalidState { .. })
    ));

    orchestrator.initialize().unwrap();
    orchestrator.start().unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(probe.calls.load(Ordering::SeqCst) > 2);
    assert!(orchestrator.metrics().latest("system.cpu_percent").is_some());

    orchestrator.stop().await;
    orchestrator.stop().await;
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);

    let calls = probe.calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(probe.calls.load(Ordering::SeqCst), calls);
}

#[tokio::test]
async fn cache_survives_restart_with_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let config = weather_config().with_data_dir(dir.path().to_string_lossy());

    let provider = ScriptedProvider::new(true, json!({"city": "Porto", "temp_c": 21.0}));
    let orchestrator = started(config.clone(), provider);
    orchestrator.run_collection_cycle().await;
    assert!(dir.path().join("cache.json").exists());

    // New process, provider down from the start
    let provider = ScriptedProvider::new(false, Value::Null);
    let restarted = started(config, provider);
    let report = restarted.run_collection_cycle().await;
    assert_eq!(report.fallbacks, 1);
}

#[tokio::test]
async fn collection_cycle_prunes_old_log_files() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("vigild.log.2026-01-01");
    let current = dir.path().join("vigild.log.2026-10-19");
    std::fs::write(&old, b"old\n").unwrap();
    std::fs::write(&current, b"current\n").unwrap();
    std::fs::File::options()
        .write(true)
        .open(&old)
        .unwrap()
        .set_modified(std::time::SystemTime::now() - Duration::from_secs(8 * 24 * 3600))
        .unwrap();

    let mut config = weather_config();
    config.logging.dir = Some(dir.path().to_string_lossy().into_owned());
    let provider = ScriptedProvider::new(true, json!({"city": "Porto", "temp_c": 18.5}));
    let orchestrator = started(config, provider);

    let report = orchestrator.run_collection_cycle().await;
    assert_eq!(report.pruned_logs, 1);
    assert!(!old.exists());
    assert!(current.exists());

    // Stdout-only logging has nothing to prune
    let provider = ScriptedProvider::new(true, json!({"city": "Porto", "temp_c": 18.5}));
    let report = started(weather_config(), provider).run_collection_cycle().await;
    assert_eq!(report.pruned_logs, 0);
}

#[tokio::test]
async fn error_rate_is_sampled_once_per_monitoring_pass() {
    let provider = ScriptedProvider::new(true, json!({"city": "Porto", "temp_c": 18.5}));
    let orchestrator = started(weather_config(), provider);

    orchestrator.run_collection_cycle().await;
    orchestrator.run_collection_cycle().await;
    assert_eq!(orchestrator.metrics().total_recorded("pipeline.error_rate"), 0);

    orchestrator.run_monitoring_pass().await.unwrap();
    assert_eq!(orchestrator.metrics().total_recorded("pipeline.error_rate"), 1);
    assert_eq!(orchestrator.metrics().latest("pipeline.error_rate").unwrap().value, 0.0);
}
