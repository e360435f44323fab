//! Process lifecycle, the main collection cycle and background workers.
//!
//! ```text
//!   Created ──initialize()──► Initialized ──start()──► Running ──stop()──► Stopped
//!
//!   Running:
//!     monitoring  ─ probe + pipeline + cache gauges ─► MetricsRegistry, system health
//!     alert       ─ AlertEngine::check_alerts
//!     anomaly     ─ recent samples of tracked metrics ─► AnomalyEngine
//!     main cycle  ─ provider ─► resilience ─► validate ─► cache, then maintenance
//! ```
//!
//! Each worker owns its interval and its failure domain. A failed or
//! panicking pass is logged, the worker backs off and carries on.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};
use vigil_alerts::{AlertEngine, AlertEngineConfig, AlertStats, LogChannel, NotificationChannel};
use vigil_anomaly::{AnomalyEngine, AnomalyStats, InMemoryModelStore, JsonFileModelStore, ModelStore};
use vigil_cache::{Cache, CacheStats, JsonFileSnapshot};
use vigil_resilience::{
    CallPolicy, CircuitState, CoordinatorStatus, FallbackConfig, ResilienceCoordinator,
    ResilienceError,
};
use vigil_types::{ComponentHealth, HealthStatus, MetricSource};

use crate::config::{DaemonConfig, ThresholdConfig};
use crate::error::{DaemonError, DaemonResult};
use crate::logs;
use crate::metrics::{MetricSummary, MetricsRegistry};
use crate::probe::SystemProbe;
use crate::provider::{DataProvider, FetchRequest, ProviderStats};
use crate::validation::DataValidator;

/// Gauges recorded by the daemon itself.
pub mod metric_names {
    pub const CPU_PERCENT: &str = "system.cpu_percent";
    pub const MEMORY_PERCENT: &str = "system.memory_percent";
    pub const DISK_PERCENT: &str = "system.disk_percent";
    pub const ERROR_RATE: &str = "pipeline.error_rate";
    pub const CACHE_HIT_RATE: &str = "cache.hit_rate";
    pub const CACHE_MISS_RATE: &str = "cache.miss_rate";
    pub const CACHE_SIZE: &str = "cache.size";
    pub const OPEN_CIRCUITS: &str = "resilience.open_circuits";
}

/// Share above a threshold at which a warning becomes an error.
const CRITICAL_MARGIN: f64 = 1.2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrchestratorState {
    Created,
    Initialized,
    Running,
    Stopped,
}

impl std::fmt::Display for OrchestratorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrchestratorState::Created => write!(f, "created"),
            OrchestratorState::Initialized => write!(f, "initialized"),
            OrchestratorState::Running => write!(f, "running"),
            OrchestratorState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    fallback_responses: AtomicU64,
    validation_failures: AtomicU64,
    alerts_triggered: AtomicU64,
    anomalies_detected: AtomicU64,
    cycles_completed: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PipelineStats {
        PipelineStats {
            total_requests: self.total_requests.load(Ordering::Relaxed),
            successful_requests: self.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.failed_requests.load(Ordering::Relaxed),
            fallback_responses: self.fallback_responses.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            alerts_triggered: self.alerts_triggered.load(Ordering::Relaxed),
            anomalies_detected: self.anomalies_detected.load(Ordering::Relaxed),
            cycles_completed: self.cycles_completed.load(Ordering::Relaxed),
        }
    }
}

/// Counters since startup. May be slightly stale.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    /// Includes requests answered by a fallback.
    pub failed_requests: u64,
    pub fallback_responses: u64,
    pub validation_failures: u64,
    pub alerts_triggered: u64,
    pub anomalies_detected: u64,
    pub cycles_completed: u64,
}

impl PipelineStats {
    /// Failed requests in percent of all requests.
    pub fn error_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.failed_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

/// System status report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub state: OrchestratorState,
    pub health: HealthStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub uptime_secs: u64,
    pub stats: PipelineStats,
    pub components: Vec<ComponentHealth>,
}

/// Everything the reporting layer may want in one read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetailedMetrics {
    pub metrics: BTreeMap<String, MetricSummary>,
    pub pipeline: PipelineStats,
    pub cache: CacheStats,
    pub resilience: CoordinatorStatus,
    pub alerts: AlertStats,
    pub anomalies: AnomalyStats,
    pub providers: BTreeMap<String, ProviderStats>,
}

/// Outcome of one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub targets: usize,
    /// Fresh data validated and cached
    pub collected: usize,
    /// Served from the cache after the provider failed
    pub fallbacks: usize,
    pub failed: usize,
    pub rejected: usize,
    pub expired_entries: usize,
    pub pruned_alerts: usize,
    pub pruned_anomalies: usize,
    pub pruned_logs: usize,
}

/// Owns every component and the background workers.
pub struct Orchestrator {
    config: DaemonConfig,
    state: RwLock<OrchestratorState>,

    cache: Arc<Cache<Value>>,
    coordinator: Arc<ResilienceCoordinator<FetchRequest, Value>>,
    alerts: Arc<AlertEngine>,
    anomaly: Arc<AnomalyEngine>,
    metrics: Arc<MetricsRegistry>,
    validator: DataValidator,

    providers: DashMap<String, Arc<dyn DataProvider>>,
    provider_stats: DashMap<String, ProviderStats>,
    probe: RwLock<Option<Arc<dyn SystemProbe>>>,

    system_health: RwLock<ComponentHealth>,
    counters: Counters,
    start_time: RwLock<Option<DateTime<Utc>>>,
    /// `total_recorded` per tracked metric at the last anomaly pass
    analysed: Mutex<HashMap<String, u64>>,

    shutdown: watch::Sender<bool>,
    workers: Mutex<Vec<(&'static str, JoinHandle<()>)>>,
}

impl Orchestrator {
    /// Build every component from `config`. Nothing runs until
    /// [`initialize`](Self::initialize) and [`start`](Self::start).
    pub fn new(config: DaemonConfig) -> Arc<Self> {
        let data_dir = config.data_dir();

        let cache_config = config.cache.to_cache_config();
        let cache = if config.cache.persist {
            Cache::with_snapshot(
                cache_config,
                Arc::new(JsonFileSnapshot::new(data_dir.join("cache.json"))),
            )
        } else {
            Cache::new(cache_config)
        };

        let metrics = Arc::new(MetricsRegistry::default());
        let alerts = AlertEngine::new(
            AlertEngineConfig {
                max_history: config.alerts.max_history,
                max_active: config.alerts.max_active,
                source: config.service.name.clone(),
            },
            metrics.clone() as Arc<dyn MetricSource>,
        );

        let store: Arc<dyn ModelStore> = if config.anomaly.persist_models {
            Arc::new(JsonFileModelStore::new(data_dir.join("models")))
        } else {
            Arc::new(InMemoryModelStore::new())
        };
        let anomaly = AnomalyEngine::new(config.anomaly.engine.clone(), store);

        let (shutdown, _) = watch::channel(false);

        Arc::new(Self {
            validator: DataValidator::new(config.validation.clone()),
            config,
            state: RwLock::new(OrchestratorState::Created),
            cache: Arc::new(cache),
            coordinator: Arc::new(ResilienceCoordinator::new()),
            alerts: Arc::new(alerts),
            anomaly: Arc::new(anomaly),
            metrics,
            providers: DashMap::new(),
            provider_stats: DashMap::new(),
            probe: RwLock::new(None),
            system_health: RwLock::new(ComponentHealth::healthy("system")),
            counters: Counters::default(),
            start_time: RwLock::new(None),
            analysed: Mutex::new(HashMap::new()),
            shutdown,
            workers: Mutex::new(Vec::new()),
        })
    }

    /// Add a data provider. Providers registered after `initialize` are
    /// wired immediately.
    pub fn register_provider(&self, provider: Arc<dyn DataProvider>) {
        let id = provider.id().to_string();
        info!(provider = %id, "Data provider registered");
        self.providers.insert(id.clone(), provider);
        self.provider_stats.entry(id.clone()).or_default();

        if self.state() != OrchestratorState::Created {
            self.wire_provider(&id);
        }
    }

    pub fn set_probe(&self, probe: Arc<dyn SystemProbe>) {
        *self.probe.write() = Some(probe);
    }

    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.alerts.register_channel(channel);
    }

    /// Wire resilience per provider, the log channel and the stock alert
    /// rules.
    pub fn initialize(&self) -> DaemonResult<()> {
        self.transition("initialize", OrchestratorState::Created, OrchestratorState::Initialized)?;

        let ids: Vec<String> = self.providers.iter().map(|p| p.key().clone()).collect();
        for id in &ids {
            self.wire_provider(id);
        }

        for target in &self.config.collection.targets {
            if !self.providers.contains_key(&target.provider_id) {
                warn!(
                    provider = %target.provider_id,
                    endpoint = %target.endpoint,
                    "Collection target references an unregistered provider"
                );
            }
        }

        self.alerts.register_channel(Arc::new(LogChannel::default()));
        if self.config.alerts.default_rules {
            for rule in vigil_alerts::AlertRule::defaults() {
                self.alerts
                    .add_rule(rule)
                    .map_err(|e| DaemonError::Config(e.to_string()))?;
            }
        }

        info!(
            providers = ids.len(),
            targets = self.config.collection.targets.len(),
            rules = self.alerts.rules().len(),
            "Orchestrator initialized"
        );
        Ok(())
    }

    /// Spawn the background workers.
    pub fn start(self: &Arc<Self>) -> DaemonResult<()> {
        self.transition("start", OrchestratorState::Initialized, OrchestratorState::Running)?;
        *self.start_time.write() = Some(Utc::now());

        let workers = &self.config.workers;
        let spawned = vec![
            (
                "monitoring",
                self.spawn_worker("monitoring", secs(workers.monitoring_interval_secs), |o| async move {
                    o.run_monitoring_pass().await.map(|_| ())
                }),
            ),
            (
                "alert",
                self.spawn_worker("alert", secs(workers.alert_interval_secs), |o| async move {
                    o.run_alert_pass().await;
                    Ok(())
                }),
            ),
            (
                "anomaly",
                self.spawn_worker("anomaly", secs(workers.anomaly_interval_secs), |o| async move {
                    o.run_anomaly_pass().await.map(|_| ())
                }),
            ),
            (
                "main_cycle",
                self.spawn_worker("main_cycle", secs(workers.main_cycle_interval_secs), |o| async move {
                    o.run_collection_cycle().await;
                    Ok(())
                }),
            ),
        ];
        self.workers.lock().extend(spawned);

        info!("Orchestrator started");
        Ok(())
    }

    /// Signal every worker and wait for each up to the stop timeout.
    /// Calling it again, or before `start`, is a no-op.
    pub async fn stop(&self) {
        {
            let mut state = self.state.write();
            if *state == OrchestratorState::Stopped {
                return;
            }
            *state = OrchestratorState::Stopped;
        }
        self.shutdown.send_replace(true);

        let workers = std::mem::take(&mut *self.workers.lock());
        let timeout = self.config.workers.stop_timeout();
        for (name, mut handle) in workers {
            match tokio::time::timeout(timeout, &mut handle).await {
                Ok(Ok(())) => debug!(worker = name, "Worker joined"),
                Ok(Err(e)) => warn!(worker = name, error = %e, "Worker ended abnormally"),
                Err(_) => {
                    warn!(
                        worker = name,
                        timeout_secs = timeout.as_secs(),
                        "Worker did not stop in time, aborting"
                    );
                    handle.abort();
                }
            }
        }

        info!("Orchestrator stopped");
    }

    /// Collect from every configured target, then run the maintenance
    /// sweeps.
    #[instrument(skip(self))]
    pub async fn run_collection_cycle(&self) -> CycleReport {
        let mut report = CycleReport {
            targets: self.config.collection.targets.len(),
            ..Default::default()
        };

        for target in &self.config.collection.targets {
            let request = FetchRequest::from(target);
            let Some(provider) = self
                .providers
                .get(&request.provider_id)
                .map(|p| p.value().clone())
            else {
                warn!(provider = %request.provider_id, "Skipping target, provider not registered");
                report.failed += 1;
                continue;
            };

            Counters::bump(&self.counters.total_requests, 1);
            self.update_provider(&request.provider_id, |s| s.requests += 1);

            let policy = CallPolicy::new()
                .circuit_breaker(&request.provider_id)
                .retry(&request.provider_id)
                .fallback(&request.provider_id);
            let live = AtomicBool::new(false);

            let result = self
                .coordinator
                .resilient_call(&policy, &request, || async {
                    let outcome = provider
                        .fetch(&request)
                        .await
                        .into_result(&request.provider_id);
                    if outcome.is_ok() {
                        live.store(true, Ordering::Relaxed);
                    }
                    outcome
                })
                .await;

            match result {
                Ok(data) if live.load(Ordering::Relaxed) => {
                    match self.validator.check(&target.dataset, &data) {
                        Ok(validation) => {
                            for warning in &validation.warnings {
                                debug!(dataset = %target.dataset, warning = %warning, "Validation warning");
                            }
                            let ttl = target.cache_ttl_secs.map(Duration::from_secs);
                            self.cache.set(request.cache_key(), data, ttl);
                            Counters::bump(&self.counters.successful_requests, 1);
                            self.update_provider(&request.provider_id, |s| {
                                s.successes += 1;
                                s.last_success = Some(Utc::now());
                            });
                            report.collected += 1;
                        }
                        Err(e) => {
                            warn!(request = %request, error = %e, "Rejected provider data");
                            Counters::bump(&self.counters.validation_failures, 1);
                            Counters::bump(&self.counters.failed_requests, 1);
                            self.update_provider(&request.provider_id, |s| {
                                s.failures += 1;
                                s.last_error = Some(e.to_string());
                            });
                            report.rejected += 1;
                        }
                    }
                }
                Ok(_) => {
                    Counters::bump(&self.counters.failed_requests, 1);
                    Counters::bump(&self.counters.fallback_responses, 1);
                    self.update_provider(&request.provider_id, |s| {
                        s.failures += 1;
                        s.fallbacks += 1;
                    });
                    report.fallbacks += 1;
                }
                Err(e) => {
                    if let ResilienceError::CircuitOpen(_) = &e {
                        warn!(request = %request, "Circuit open and no cached data");
                    } else {
                        error!(request = %request, error = %e, "Collection failed");
                    }
                    Counters::bump(&self.counters.failed_requests, 1);
                    self.update_provider(&request.provider_id, |s| {
                        s.failures += 1;
                        s.last_error = Some(e.to_string());
                    });
                    report.failed += 1;
                }
            }
        }

        let retention = self.config.workers.retention_days;
        report.expired_entries = self.cache.cleanup_expired();
        report.pruned_alerts = self.alerts.cleanup_old_alerts(retention);
        report.pruned_anomalies = self.anomaly.cleanup_old_anomalies(retention);
        report.pruned_logs = self.prune_old_logs(retention);

        Counters::bump(&self.counters.cycles_completed, 1);
        info!(
            collected = report.collected,
            fallbacks = report.fallbacks,
            failed = report.failed,
            rejected = report.rejected,
            "Collection cycle completed"
        );
        report
    }

    /// Remove rotated log files older than `retention_days` from the
    /// configured log directory. No-op when logging to stdout only.
    pub fn prune_old_logs(&self, retention_days: u32) -> usize {
        let Some(dir) = self.config.log_dir() else {
            return 0;
        };
        logs::prune_old_logs(&dir, &self.config.logging.file_prefix, retention_days)
    }

    /// Sample host, pipeline and cache gauges and reclassify system health.
    pub async fn run_monitoring_pass(&self) -> DaemonResult<ComponentHealth> {
        let probe = self.probe.read().clone();
        if let Some(probe) = probe {
            let sample = probe.sample().await?;
            self.metrics.record(metric_names::CPU_PERCENT, sample.cpu_percent);
            self.metrics
                .record(metric_names::MEMORY_PERCENT, sample.memory_percent);
            if let Some(disk) = sample.disk_percent {
                self.metrics.record(metric_names::DISK_PERCENT, disk);
            }
        }

        let error_rate = self.counters.snapshot().error_rate();
        self.metrics.record(metric_names::ERROR_RATE, error_rate);

        let cache = self.cache.stats();
        self.metrics.record(metric_names::CACHE_SIZE, cache.size as f64);
        if cache.total_requests > 0 {
            self.metrics.record(metric_names::CACHE_HIT_RATE, cache.hit_rate);
            self.metrics
                .record(metric_names::CACHE_MISS_RATE, 100.0 - cache.hit_rate);
        }

        let open = self
            .coordinator
            .status()
            .circuit_breakers
            .values()
            .filter(|b| b.state == CircuitState::Open)
            .count();
        self.metrics.record(metric_names::OPEN_CIRCUITS, open as f64);

        let health = classify_health(
            &self.config.thresholds,
            self.metrics.get_metric(metric_names::CPU_PERCENT),
            self.metrics.get_metric(metric_names::MEMORY_PERCENT),
            error_rate,
        );

        let previous = std::mem::replace(&mut *self.system_health.write(), health.clone());
        if previous.status != health.status {
            info!(
                from = %previous.status,
                to = %health.status,
                detail = health.detail.as_deref().unwrap_or(""),
                "System health changed"
            );
        }
        Ok(health)
    }

    /// Evaluate alert rules once. Returns the number of alerts fired.
    pub async fn run_alert_pass(&self) -> usize {
        let fired = self.alerts.check_alerts().await.len();
        Counters::bump(&self.counters.alerts_triggered, fired as u64);
        fired
    }

    /// Feed the recent samples of every tracked metric that received new
    /// data since the last pass. Returns the number of newly flagged points.
    pub async fn run_anomaly_pass(&self) -> DaemonResult<usize> {
        let window = self.config.anomaly.sample_window;
        let mut flagged = 0;

        for metric in &self.config.anomaly.tracked_metrics {
            let recorded = self.metrics.total_recorded(metric);
            let seen = self.analysed.lock().get(metric).copied().unwrap_or(0);
            if recorded <= seen {
                continue;
            }

            let values = self.metrics.recent(metric, window);
            let fresh = ((recorded - seen) as usize).min(values.len());
            let first_fresh = values.len() - fresh;

            let engine = self.anomaly.clone();
            let name = metric.clone();
            let results = tokio::task::spawn_blocking(move || engine.detect_anomalies(&name, &values))
                .await
                .map_err(|e| DaemonError::Worker(format!("anomaly detection for {}: {}", metric, e)))?;

            let new = results.iter().filter(|r| r.index >= first_fresh).count();
            if new > 0 {
                info!(metric = %metric, anomalies = new, "Anomalies detected");
            }
            flagged += new;
            self.analysed.lock().insert(metric.clone(), recorded);
        }

        Counters::bump(&self.counters.anomalies_detected, flagged as u64);
        Ok(flagged)
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.read()
    }

    /// Worst of every component's health.
    pub fn health(&self) -> HealthStatus {
        HealthStatus::worst(self.component_health().into_iter().map(|c| c.status))
    }

    pub fn component_health(&self) -> Vec<ComponentHealth> {
        vec![
            self.system_health.read().clone(),
            self.cache.health(),
            self.coordinator.health(),
            self.alerts.health(),
            self.anomaly.health(),
        ]
    }

    pub fn status(&self) -> SystemStatus {
        let components = self.component_health();
        let start_time = *self.start_time.read();
        let uptime_secs = start_time
            .map(|t| (Utc::now() - t).num_seconds().max(0) as u64)
            .unwrap_or(0);

        SystemStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: self.state(),
            health: HealthStatus::worst(components.iter().map(|c| c.status)),
            start_time,
            uptime_secs,
            stats: self.counters.snapshot(),
            components,
        }
    }

    pub fn detailed_metrics(&self) -> DetailedMetrics {
        DetailedMetrics {
            metrics: self.metrics.summary(),
            pipeline: self.counters.snapshot(),
            cache: self.cache.stats(),
            resilience: self.coordinator.status(),
            alerts: self.alerts.alert_stats(),
            anomalies: self.anomaly.anomaly_stats(),
            providers: self.provider_stats(),
        }
    }

    pub fn provider_stats(&self) -> BTreeMap<String, ProviderStats> {
        self.provider_stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn config(&self) -> &DaemonConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<Cache<Value>> {
        &self.cache
    }

    pub fn coordinator(&self) -> &Arc<ResilienceCoordinator<FetchRequest, Value>> {
        &self.coordinator
    }

    pub fn alerts(&self) -> &Arc<AlertEngine> {
        &self.alerts
    }

    pub fn anomaly(&self) -> &Arc<AnomalyEngine> {
        &self.anomaly
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Breaker, retry and cache fallback for one provider, all named after it.
    fn wire_provider(&self, id: &str) {
        let settings = &self.config.resilience;
        self.coordinator
            .create_circuit_breaker(id, settings.circuit_breaker());
        self.coordinator.create_retry_handler(id, settings.retry());

        let cache = self.cache.clone();
        self.coordinator.create_fallback_handler(
            id,
            FallbackConfig::function(move |request: &FetchRequest| cache.get(&request.cache_key())),
        );
    }

    fn transition(
        &self,
        action: &'static str,
        from: OrchestratorState,
        to: OrchestratorState,
    ) -> DaemonResult<()> {
        let mut state = self.state.write();
        if *state != from {
            return Err(DaemonError::InvalidState {
                action,
                state: state.to_string(),
            });
        }
        *state = to;
        Ok(())
    }

    fn update_provider(&self, id: &str, f: impl FnOnce(&mut ProviderStats)) {
        f(&mut self.provider_stats.entry(id.to_string()).or_default());
    }

    fn spawn_worker<F, Fut>(self: &Arc<Self>, name: &'static str, period: Duration, pass: F) -> JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + 'static,
        Fut: Future<Output = DaemonResult<()>> + Send + 'static,
    {
        let orchestrator = self.clone();
        let mut shutdown = self.shutdown.subscribe();
        let backoff = self.config.workers.error_backoff();

        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(worker = name, period_secs = period.as_secs(), "Worker started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }
                if *shutdown.borrow() {
                    break;
                }

                let failure = match AssertUnwindSafe(pass(orchestrator.clone())).catch_unwind().await {
                    Ok(Ok(())) => continue,
                    Ok(Err(e)) => e.to_string(),
                    Err(panic) => panic_message(panic.as_ref()),
                };
                error!(
                    worker = name,
                    error = %failure,
                    backoff_secs = backoff.as_secs(),
                    "Worker pass failed"
                );

                tokio::select! {
                    _ = tokio::time::sleep(backoff) => {}
                    _ = shutdown.changed() => break,
                }
            }

            info!(worker = name, "Worker stopped");
        })
    }
}

/// Health from thresholds: above a threshold is a warning, above it by
/// 20% (or twice the error-rate threshold) is unhealthy.
pub fn classify_health(
    thresholds: &ThresholdConfig,
    cpu_percent: Option<f64>,
    memory_percent: Option<f64>,
    error_rate: f64,
) -> ComponentHealth {
    let mut status = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    let gauges = [
        ("cpu", cpu_percent, thresholds.cpu_percent, thresholds.cpu_percent * CRITICAL_MARGIN),
        ("memory", memory_percent, thresholds.memory_percent, thresholds.memory_percent * CRITICAL_MARGIN),
        ("error rate", Some(error_rate), thresholds.error_rate_percent, thresholds.error_rate_percent * 2.0),
    ];

    for (label, value, warn_at, critical_at) in gauges {
        let Some(value) = value else { continue };
        let level = if value > critical_at {
            HealthStatus::Unhealthy
        } else if value > warn_at {
            HealthStatus::Warning
        } else {
            continue;
        };
        reasons.push(format!("{} {:.1}% above {:.1}%", label, value, warn_at));
        status = status.max(level);
    }

    if reasons.is_empty() {
        ComponentHealth::healthy("system")
    } else {
        ComponentHealth::with_status("system", status, reasons.join(", "))
    }
}

fn secs(value: u64) -> Duration {
    Duration::from_secs(value.max(1))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}
