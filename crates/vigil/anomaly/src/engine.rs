//! Per-metric model lifecycle and detection history.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use vigil_types::{ComponentHealth, HealthStatus};

use crate::artifact::ModelArtifact;
use crate::config::{Algorithm, AnomalyConfig, AnomalyEngineConfig};
use crate::detectors::{Detector, PointAnomaly, StatisticalDetector, ZScoreDetector};
use crate::error::{AnomalyError, AnomalyResult};
use crate::features::{sliding_features, FeatureVector};
use crate::models::{train, ModelTrainer};
use crate::persistence::ModelStore;

/// One analysed point. Only flagged points are reported and kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    pub timestamp: DateTime<Utc>,
    pub metric: String,
    /// Position of the point in the analysed series.
    pub index: usize,
    pub value: f64,
    pub is_anomaly: bool,
    pub score: f64,
    pub confidence: f64,
    /// Algorithm that actually produced the result. A model-based metric
    /// reports `z_score` when it fell back to the statistical test.
    pub algorithm: Algorithm,
    pub threshold: f64,
    pub context: BTreeMap<String, f64>,
}

impl DetectionResult {
    fn from_point(metric: &str, algorithm: Algorithm, point: PointAnomaly, at: DateTime<Utc>) -> Self {
        Self {
            timestamp: at,
            metric: metric.to_string(),
            index: point.index,
            value: point.value,
            is_anomaly: true,
            score: point.score,
            confidence: point.confidence,
            algorithm,
            threshold: point.threshold,
            context: point.context,
        }
    }
}

/// Summary of a metric's current model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub metric: String,
    pub algorithm: Algorithm,
    pub window_size: usize,
    pub trained_at: DateTime<Utc>,
    pub n_samples: usize,
}

impl From<&ModelArtifact> for ModelInfo {
    fn from(artifact: &ModelArtifact) -> Self {
        Self {
            metric: artifact.metric.clone(),
            algorithm: artifact.algorithm,
            window_size: artifact.window_size,
            trained_at: artifact.trained_at,
            n_samples: artifact.n_samples,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyStats {
    pub total: usize,
    pub metrics_with_anomalies: usize,
    pub algorithm_distribution: BTreeMap<Algorithm, usize>,
    pub metric_distribution: BTreeMap<String, usize>,
    pub last_anomaly: Option<DateTime<Utc>>,
    /// Successful training passes since startup.
    pub models_trained: u64,
}

/// Model state of one metric. Locked for the whole train-then-score
/// sequence so two passes over the same metric never race a retrain.
#[derive(Default)]
struct MetricSlot {
    model: Option<ModelArtifact>,
    /// Whether the store has been consulted yet.
    loaded: bool,
    last_training_error: Option<String>,
}

/// Detects anomalies in metric series.
///
/// Model-based metrics train lazily on the first series that is long
/// enough, retrain once the model is older than `retrain_interval`, and
/// persist every model through the [`ModelStore`]. Nothing here fails a
/// caller: short series are ignored, and training or storage problems
/// degrade to the z-score test.
pub struct AnomalyEngine {
    config: RwLock<AnomalyEngineConfig>,
    store: Arc<dyn ModelStore>,
    slots: DashMap<String, Arc<Mutex<MetricSlot>>>,
    history: Mutex<VecDeque<DetectionResult>>,
    models_trained: AtomicU64,
}

impl AnomalyEngine {
    pub fn new(config: AnomalyEngineConfig, store: Arc<dyn ModelStore>) -> Self {
        Self {
            config: RwLock::new(config),
            store,
            slots: DashMap::new(),
            history: Mutex::new(VecDeque::new()),
            models_trained: AtomicU64::new(0),
        }
    }

    /// Override the settings of one metric. A model trained under other
    /// settings is replaced on the next detection.
    pub fn set_metric_config(&self, metric: impl Into<String>, config: AnomalyConfig) {
        self.config.write().metrics.insert(metric.into(), config);
    }

    pub fn config_for(&self, metric: &str) -> AnomalyConfig {
        self.config.read().config_for(metric).clone()
    }

    // ── Detection ───────────────────────────────────────────────────────

    /// Analyse `values` (oldest first) and return the flagged points.
    #[instrument(skip(self, values), fields(samples = values.len()))]
    pub fn detect_anomalies(&self, metric: &str, values: &[f64]) -> Vec<DetectionResult> {
        let config = self.config_for(metric);
        if !config.enabled {
            return Vec::new();
        }
        if values.len() < config.min_samples {
            debug!(
                metric = metric,
                needed = config.min_samples,
                "Not enough samples, skipping detection"
            );
            return Vec::new();
        }
        if values.iter().any(|v| !v.is_finite()) {
            warn!(metric = metric, "Series contains non-finite values, skipping detection");
            return Vec::new();
        }

        let (algorithm, points) = match Detector::for_config(&config) {
            Detector::Statistical(detector) => (detector.algorithm(), detector.detect(values)),
            Detector::Model(trainer) => self.detect_with_model(metric, &config, trainer.as_ref(), values),
        };

        let now = Utc::now();
        let results: Vec<DetectionResult> = points
            .into_iter()
            .map(|point| DetectionResult::from_point(metric, algorithm, point, now))
            .collect();

        if !results.is_empty() {
            info!(
                metric = metric,
                algorithm = %algorithm,
                count = results.len(),
                "Anomalies detected"
            );
            self.record(&results);
        }
        results
    }

    fn detect_with_model(
        &self,
        metric: &str,
        config: &AnomalyConfig,
        trainer: &dyn ModelTrainer,
        values: &[f64],
    ) -> (Algorithm, Vec<PointAnomaly>) {
        let windows = sliding_features(values, config.window_size);
        if windows.is_empty() {
            debug!(
                metric = metric,
                window_size = config.window_size,
                "Series shorter than the feature window, using z-score"
            );
            return statistical_fallback(values);
        }

        let slot = self.slot(metric);
        let mut slot = slot.lock();
        self.load_stored(metric, config, &mut slot);

        let current = slot
            .model
            .as_ref()
            .is_some_and(|m| m.validate(metric, config).is_ok() && !m.is_stale(config, Utc::now()));
        if !current {
            if let Err(e) = self.retrain(metric, config, trainer, &windows, &mut slot) {
                warn!(metric = metric, error = %e, "Model training failed, using z-score");
                return statistical_fallback(values);
            }
        }

        let model = match slot.model.as_ref() {
            Some(model) if model.validate(metric, config).is_ok() => model,
            _ => return statistical_fallback(values),
        };

        let offset = config.window_size - 1;
        let points = windows
            .iter()
            .enumerate()
            .filter_map(|(i, window)| {
                let raw = model.state.raw_score(window);
                let score = model.reference_scores.normalize(raw);
                (score > config.threshold).then(|| PointAnomaly {
                    index: i + offset,
                    value: values[i + offset],
                    score,
                    confidence: score,
                    threshold: config.threshold,
                    context: BTreeMap::from([
                        ("raw_score".to_string(), raw),
                        ("window_mean".to_string(), window[0]),
                        ("window_std".to_string(), window[1]),
                    ]),
                })
            })
            .collect();
        (model.algorithm, points)
    }

    /// Train a fresh model for `metric` now, regardless of its age.
    pub fn train_model(&self, metric: &str, values: &[f64]) -> AnomalyResult<ModelInfo> {
        let config = self.config_for(metric);
        let Detector::Model(trainer) = Detector::for_config(&config) else {
            return Err(AnomalyError::Training(format!(
                "{} does not use a trained model",
                config.algorithm
            )));
        };

        let windows = sliding_features(values, config.window_size);
        let slot = self.slot(metric);
        let mut slot = slot.lock();
        slot.loaded = true;
        self.retrain(metric, &config, trainer.as_ref(), &windows, &mut slot)?;
        slot.model
            .as_ref()
            .map(ModelInfo::from)
            .ok_or_else(|| AnomalyError::Training("no model after training".to_string()))
    }

    fn retrain(
        &self,
        metric: &str,
        config: &AnomalyConfig,
        trainer: &dyn ModelTrainer,
        windows: &[FeatureVector],
        slot: &mut MetricSlot,
    ) -> AnomalyResult<()> {
        let (state, reference) = match train(trainer, windows, config.contamination) {
            Ok(trained) => trained,
            Err(e) => {
                slot.last_training_error = Some(e.to_string());
                return Err(e);
            }
        };

        let artifact = ModelArtifact::new(metric, config, windows.len(), state, reference);
        if let Err(e) = self.store.save(&artifact) {
            warn!(metric = metric, error = %e, "Failed to persist model");
        }
        info!(
            metric = metric,
            algorithm = %artifact.algorithm,
            windows = windows.len(),
            "Model trained"
        );

        slot.model = Some(artifact);
        slot.last_training_error = None;
        self.models_trained.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Adopt the stored model on first use. Unusable artifacts are ignored.
    fn load_stored(&self, metric: &str, config: &AnomalyConfig, slot: &mut MetricSlot) {
        if slot.loaded {
            return;
        }
        slot.loaded = true;

        match self.store.load(metric) {
            Ok(Some(artifact)) => match artifact.validate(metric, config) {
                Ok(()) => {
                    debug!(metric = metric, trained_at = %artifact.trained_at, "Loaded stored model");
                    slot.model = Some(artifact);
                }
                Err(e) => warn!(metric = metric, error = %e, "Discarding stored model"),
            },
            Ok(None) => {}
            Err(e) => warn!(metric = metric, error = %e, "Stored model unreadable, retraining"),
        }
    }

    fn slot(&self, metric: &str) -> Arc<Mutex<MetricSlot>> {
        self.slots.entry(metric.to_string()).or_default().clone()
    }

    fn record(&self, results: &[DetectionResult]) {
        let max = self.config.read().max_history;
        let mut history = self.history.lock();
        history.extend(results.iter().cloned());
        while history.len() > max {
            history.pop_front();
        }
    }

    // ── Queries ─────────────────────────────────────────────────────────

    pub fn model_info(&self, metric: &str) -> Option<ModelInfo> {
        let slot = self.slots.get(metric)?.value().clone();
        let slot = slot.lock();
        slot.model.as_ref().map(ModelInfo::from)
    }

    /// The `limit` most recent results, optionally for one metric, oldest first.
    pub fn get_anomaly_history(&self, metric: Option<&str>, limit: usize) -> Vec<DetectionResult> {
        let history = self.history.lock();
        let mut recent: Vec<DetectionResult> = history
            .iter()
            .rev()
            .filter(|r| metric.map_or(true, |m| r.metric == m))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    pub fn anomaly_stats(&self) -> AnomalyStats {
        let history = self.history.lock();
        let mut algorithm_distribution = BTreeMap::new();
        let mut metric_distribution = BTreeMap::new();
        for result in history.iter() {
            *algorithm_distribution.entry(result.algorithm).or_insert(0) += 1;
            *metric_distribution.entry(result.metric.clone()).or_insert(0) += 1;
        }

        AnomalyStats {
            total: history.len(),
            metrics_with_anomalies: metric_distribution.len(),
            algorithm_distribution,
            metric_distribution,
            last_anomaly: history.back().map(|r| r.timestamp),
            models_trained: self.models_trained.load(Ordering::Relaxed),
        }
    }

    /// Drop results older than `days`. Returns how many were removed.
    pub fn cleanup_old_anomalies(&self, days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let mut history = self.history.lock();
        let before = history.len();
        history.retain(|r| r.timestamp >= cutoff);
        let removed = before - history.len();
        if removed > 0 {
            info!(removed = removed, days = days, "Pruned anomaly history");
        }
        removed
    }

    /// Warning while the latest training attempt of any metric failed.
    pub fn health(&self) -> ComponentHealth {
        let failing: BTreeSet<String> = self
            .slots
            .iter()
            .filter(|entry| entry.value().lock().last_training_error.is_some())
            .map(|entry| entry.key().clone())
            .collect();

        if failing.is_empty() {
            ComponentHealth::healthy("anomaly")
        } else {
            ComponentHealth::with_status(
                "anomaly",
                HealthStatus::Warning,
                format!(
                    "training failed for {}",
                    failing.into_iter().collect::<Vec<_>>().join(", ")
                ),
            )
        }
    }
}

fn statistical_fallback(values: &[f64]) -> (Algorithm, Vec<PointAnomaly>) {
    let detector = ZScoreDetector::default();
    (detector.algorithm(), detector.detect(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryModelStore, JsonFileModelStore};
    use std::time::Duration;

    fn spiked_series() -> Vec<f64> {
        let mut values: Vec<f64> = (0..200)
            .map(|i| 50.0 + 5.0 * (i as f64 * 0.3).sin() + ((i * 37 % 11) as f64 - 5.0) * 0.2)
            .collect();
        values.insert(150, 500.0);
        values
    }

    fn engine_with(defaults: AnomalyConfig, store: Arc<dyn ModelStore>) -> AnomalyEngine {
        AnomalyEngine::new(
            AnomalyEngineConfig {
                defaults,
                ..AnomalyEngineConfig::default()
            },
            store,
        )
    }

    fn memory_engine(defaults: AnomalyConfig) -> AnomalyEngine {
        engine_with(defaults, Arc::new(InMemoryModelStore::new()))
    }

    #[test]
    fn test_z_score_flags_only_injected_point() {
        let engine = memory_engine(AnomalyConfig::default().with_algorithm(Algorithm::ZScore));
        let mut values = vec![50.0; 99];
        values.push(500.0);

        let results = engine.detect_anomalies("latency", &values);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].value, 500.0);
        assert_eq!(results[0].index, 99);
        assert!(results[0].is_anomaly);
        assert!(results[0].context.contains_key("std"));

        assert!(engine.detect_anomalies("latency", &[50.0; 100]).is_empty());
    }

    #[test]
    fn test_too_few_samples_is_a_no_op() {
        let engine = memory_engine(AnomalyConfig::default().with_algorithm(Algorithm::ZScore));
        assert!(engine.detect_anomalies("cpu", &[1.0, 2.0, 900.0]).is_empty());
        assert_eq!(engine.anomaly_stats().total, 0);
    }

    #[test]
    fn test_isolation_forest_finds_spike() {
        let engine = memory_engine(AnomalyConfig::default().with_window_size(5));
        let values = spiked_series();

        let results = engine.detect_anomalies("throughput", &values);
        assert!(results.iter().any(|r| r.index == 150 && r.value == 500.0));
        assert!(results.iter().all(|r| r.algorithm == Algorithm::IsolationForest));
        assert!(results.iter().all(|r| r.index >= 4));
        assert!(results.len() < 20);

        let info = engine.model_info("throughput").unwrap();
        assert_eq!(info.n_samples, values.len() - 4);
        assert_eq!(engine.anomaly_stats().models_trained, 1);
    }

    #[test]
    fn test_elliptic_envelope_finds_spike() {
        let engine = memory_engine(
            AnomalyConfig::default()
                .with_algorithm(Algorithm::EllipticEnvelope)
                .with_window_size(5),
        );
        let results = engine.detect_anomalies("queue", &spiked_series());
        assert!(results.iter().any(|r| r.index == 150));
    }

    #[test]
    fn test_short_series_falls_back_to_z_score() {
        let engine = memory_engine(AnomalyConfig::default());
        let mut values = vec![10.0; 49];
        values.push(400.0);

        let results = engine.detect_anomalies("errors", &values);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].algorithm, Algorithm::ZScore);
        assert!(engine.model_info("errors").is_none());
    }

    #[test]
    fn test_model_reused_until_stale() {
        let store = Arc::new(InMemoryModelStore::new());
        let engine = engine_with(AnomalyConfig::default().with_window_size(5), store.clone());
        let values = spiked_series();

        engine.detect_anomalies("m", &values);
        let first = engine.model_info("m").unwrap().trained_at;
        engine.detect_anomalies("m", &values);
        assert_eq!(engine.model_info("m").unwrap().trained_at, first);
        assert_eq!(engine.anomaly_stats().models_trained, 1);
        assert_eq!(store.len(), 1);

        engine.set_metric_config(
            "m",
            AnomalyConfig::default()
                .with_window_size(5)
                .with_retrain_interval(Duration::ZERO),
        );
        engine.detect_anomalies("m", &values);
        assert!(engine.model_info("m").unwrap().trained_at >= first);
        assert_eq!(engine.anomaly_stats().models_trained, 2);
    }

    #[test]
    fn test_config_change_forces_retrain() {
        let engine = memory_engine(AnomalyConfig::default().with_window_size(5));
        let values = spiked_series();
        engine.detect_anomalies("m", &values);

        engine.set_metric_config("m", AnomalyConfig::default().with_window_size(8));
        engine.detect_anomalies("m", &values);
        assert_eq!(engine.model_info("m").unwrap().window_size, 8);
    }

    #[test]
    fn test_persisted_model_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = AnomalyConfig::default().with_window_size(5);
        let values = spiked_series();

        let first = engine_with(config.clone(), Arc::new(JsonFileModelStore::new(dir.path())));
        first.detect_anomalies("latency", &values);
        let trained_at = first.model_info("latency").unwrap().trained_at;

        let second = engine_with(config, Arc::new(JsonFileModelStore::new(dir.path())));
        let results = second.detect_anomalies("latency", &values);
        assert!(results.iter().any(|r| r.index == 150));
        assert_eq!(second.model_info("latency").unwrap().trained_at, trained_at);
        assert_eq!(second.anomaly_stats().models_trained, 0);
    }

    #[test]
    fn test_corrupt_artifact_triggers_retrain() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileModelStore::new(dir.path());
        std::fs::write(store.path_for("latency"), b"\x00garbage").unwrap();

        let engine = engine_with(
            AnomalyConfig::default().with_window_size(5),
            Arc::new(JsonFileModelStore::new(dir.path())),
        );
        let results = engine.detect_anomalies("latency", &spiked_series());
        assert!(results.iter().any(|r| r.index == 150));
        assert_eq!(engine.anomaly_stats().models_trained, 1);

        // The corrupt file was replaced by the fresh model
        assert!(store.load("latency").unwrap().is_some());
    }

    #[test]
    fn test_training_failure_degrades_to_z_score() {
        // 12 points, window 5: 8 windows, fewer than a model needs
        let engine = memory_engine(
            AnomalyConfig::default()
                .with_window_size(5)
                .with_min_samples(5),
        );
        let mut values = vec![1.0; 11];
        values.push(90.0);

        let results = engine.detect_anomalies("small", &values);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].algorithm, Algorithm::ZScore);
        assert_eq!(engine.health().status, HealthStatus::Warning);
        assert!(engine.train_model("small", &values).is_err());
    }

    #[test]
    fn test_failed_retrain_does_not_score_with_stale_model() {
        let config = AnomalyConfig::default()
            .with_window_size(5)
            .with_min_samples(5);
        let engine = memory_engine(config.clone());
        engine.detect_anomalies("m", &spiked_series());
        assert!(engine.model_info("m").is_some());

        // Model is now stale; 12 points give too few windows to retrain
        engine.set_metric_config("m", config.with_retrain_interval(Duration::ZERO));
        let mut values = vec![1.0; 11];
        values.push(90.0);

        let results = engine.detect_anomalies("m", &values);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].algorithm, Algorithm::ZScore);
        assert_eq!(engine.anomaly_stats().models_trained, 1);
    }

    #[test]
    fn test_train_model_rejects_statistical() {
        let engine = memory_engine(AnomalyConfig::default().with_algorithm(Algorithm::Iqr));
        assert!(matches!(
            engine.train_model("cpu", &[1.0; 50]),
            Err(AnomalyError::Training(_))
        ));
    }

    #[test]
    fn test_history_stats_and_cleanup() {
        let engine = memory_engine(AnomalyConfig::default().with_algorithm(Algorithm::ZScore));
        let mut values = vec![5.0; 30];
        values.push(100.0);
        engine.detect_anomalies("a", &values);
        engine.detect_anomalies("b", &values);
        engine.detect_anomalies("b", &values);

        assert_eq!(engine.get_anomaly_history(None, 10).len(), 3);
        assert_eq!(engine.get_anomaly_history(Some("b"), 10).len(), 2);
        assert_eq!(engine.get_anomaly_history(Some("b"), 1).len(), 1);

        let stats = engine.anomaly_stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.metrics_with_anomalies, 2);
        assert_eq!(stats.metric_distribution["b"], 2);
        assert_eq!(stats.algorithm_distribution[&Algorithm::ZScore], 3);
        assert!(stats.last_anomaly.is_some());

        assert_eq!(engine.cleanup_old_anomalies(7), 0);
        assert_eq!(engine.cleanup_old_anomalies(0), 3);
        assert_eq!(engine.anomaly_stats().total, 0);
    }

    #[test]
    fn test_history_is_bounded() {
        let engine = AnomalyEngine::new(
            AnomalyEngineConfig {
                defaults: AnomalyConfig::default().with_algorithm(Algorithm::ZScore),
                max_history: 2,
                ..AnomalyEngineConfig::default()
            },
            Arc::new(InMemoryModelStore::new()),
        );
        let mut values = vec![5.0; 30];
        values.push(100.0);
        for metric in ["a", "b", "c"] {
            engine.detect_anomalies(metric, &values);
        }
        let history = engine.get_anomaly_history(None, 10);
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].metric, "b");
    }

    #[test]
    fn test_disabled_metric_is_skipped() {
        let mut config = AnomalyConfig::default().with_algorithm(Algorithm::ZScore);
        config.enabled = false;
        let engine = memory_engine(config);
        let mut values = vec![5.0; 30];
        values.push(100.0);
        assert!(engine.detect_anomalies("a", &values).is_empty());
    }
}
