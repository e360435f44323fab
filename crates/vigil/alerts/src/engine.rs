//! Alert rule evaluation, dispatch and lifecycle.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};
use vigil_types::{ComponentHealth, HealthStatus, MetricSource};

use crate::channel::NotificationChannel;
use crate::error::{AlertError, AlertResult};
use crate::types::{
    Alert, AlertChannelKind, AlertId, AlertPayload, AlertRule, AlertSeverity, AlertStatus,
};

/// Alert engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertEngineConfig {
    /// Maximum alerts kept in history.
    pub max_history: usize,

    /// Maximum alerts held active. Past this the oldest active alert is
    /// resolved to make room.
    pub max_active: usize,

    /// Source tag stamped on every payload.
    pub source: String,
}

impl Default for AlertEngineConfig {
    fn default() -> Self {
        Self {
            max_history: 10_000,
            max_active: 1_000,
            source: "vigil".to_string(),
        }
    }
}

/// Aggregate alert statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertStats {
    /// Alerts in history.
    pub total: usize,
    pub active: usize,
    pub acknowledged: usize,
    pub resolved: usize,
    pub severity_distribution: BTreeMap<AlertSeverity, usize>,
    pub last_alert: Option<DateTime<Utc>>,
}

/// State shared by concurrent evaluation passes and lifecycle calls.
#[derive(Default)]
struct AlertState {
    active: HashMap<AlertId, Alert>,
    history: VecDeque<Alert>,
    /// Rule name -> time it last fired.
    last_trigger: HashMap<String, DateTime<Utc>>,
}

impl AlertState {
    fn in_cooldown(&self, rule: &AlertRule, now: DateTime<Utc>) -> bool {
        let Some(last) = self.last_trigger.get(&rule.name) else {
            return false;
        };
        match chrono::Duration::from_std(rule.cooldown) {
            Ok(cooldown) => now.signed_duration_since(*last) < cooldown,
            Err(_) => true,
        }
    }

    fn update_history(&mut self, alert: &Alert) {
        if let Some(entry) = self.history.iter_mut().rev().find(|a| a.id == alert.id) {
            *entry = alert.clone();
        }
    }

    /// Resolve the oldest active alerts until at most `max` remain.
    fn evict_overflow(&mut self, max: usize, now: DateTime<Utc>) {
        while self.active.len() > max {
            // History is in firing order; fall back to timestamps for
            // alerts already pruned from it
            let oldest = self
                .history
                .iter()
                .map(|a| a.id)
                .find(|id| self.active.contains_key(id))
                .or_else(|| {
                    self.active
                        .values()
                        .min_by_key(|a| a.timestamp)
                        .map(|a| a.id)
                });
            let Some(oldest) = oldest else {
                break;
            };
            let Some(mut alert) = self.active.remove(&oldest) else {
                break;
            };
            alert.status = AlertStatus::Resolved;
            alert.resolved_at = Some(now);
            self.update_history(&alert);
            warn!(
                alert_id = %alert.id,
                rule = %alert.rule_name,
                max_active = max,
                "Active alert limit reached, oldest alert resolved"
            );
        }
    }
}

/// Evaluates threshold rules against a metric source.
///
/// A rule in cooldown is skipped entirely, whether or not its last alert
/// was resolved. The cooldown check and the cooldown start happen inside
/// one critical section, so overlapping evaluation passes fire a rule at
/// most once per cooldown window.
pub struct AlertEngine {
    config: AlertEngineConfig,
    rules: RwLock<Vec<AlertRule>>,
    state: Mutex<AlertState>,
    channels: DashMap<AlertChannelKind, Arc<dyn NotificationChannel>>,
    metrics: Arc<dyn MetricSource>,
}

impl AlertEngine {
    pub fn new(config: AlertEngineConfig, metrics: Arc<dyn MetricSource>) -> Self {
        Self {
            config,
            rules: RwLock::new(Vec::new()),
            state: Mutex::new(AlertState::default()),
            channels: DashMap::new(),
            metrics,
        }
    }

    /// Engine preloaded with [`AlertRule::defaults`].
    pub fn with_default_rules(config: AlertEngineConfig, metrics: Arc<dyn MetricSource>) -> Self {
        let engine = Self::new(config, metrics);
        *engine.rules.write() = AlertRule::defaults();
        engine
    }

    // ── Rules ───────────────────────────────────────────────────────────

    /// Add a rule, replacing any rule with the same name.
    pub fn add_rule(&self, rule: AlertRule) -> AlertResult<()> {
        if rule.name.trim().is_empty() {
            return Err(AlertError::InvalidRule {
                name: rule.name,
                reason: "name must not be empty".to_string(),
            });
        }
        if !rule.threshold.is_finite() {
            return Err(AlertError::InvalidRule {
                name: rule.name,
                reason: "threshold must be finite".to_string(),
            });
        }

        let mut rules = self.rules.write();
        rules.retain(|r| r.name != rule.name);
        info!(rule = %rule.name, metric = %rule.metric, "Alert rule added");
        rules.push(rule);
        Ok(())
    }

    pub fn remove_rule(&self, name: &str) -> AlertResult<AlertRule> {
        let mut rules = self.rules.write();
        let index = rules
            .iter()
            .position(|r| r.name == name)
            .ok_or_else(|| AlertError::RuleNotFound(name.to_string()))?;
        Ok(rules.remove(index))
    }

    pub fn set_rule_enabled(&self, name: &str, enabled: bool) -> AlertResult<()> {
        let mut rules = self.rules.write();
        let rule = rules
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| AlertError::RuleNotFound(name.to_string()))?;
        rule.enabled = enabled;
        Ok(())
    }

    pub fn rules(&self) -> Vec<AlertRule> {
        self.rules.read().clone()
    }

    /// Register the channel serving its kind, replacing any previous one.
    pub fn register_channel(&self, channel: Arc<dyn NotificationChannel>) {
        self.channels.insert(channel.kind(), channel);
    }

    // ── Evaluation ──────────────────────────────────────────────────────

    /// Evaluate every enabled rule once, returning the alerts that fired.
    #[instrument(skip(self))]
    pub async fn check_alerts(&self) -> Vec<Alert> {
        let rules = self.rules();
        let mut fired = Vec::new();

        for rule in rules.iter().filter(|r| r.enabled) {
            if self.state.lock().in_cooldown(rule, Utc::now()) {
                continue;
            }

            let Some(value) = self.metrics.get_metric(&rule.metric) else {
                debug!(rule = %rule.name, metric = %rule.metric, "Metric unavailable, rule skipped");
                continue;
            };
            if !value.is_finite() {
                warn!(rule = %rule.name, metric = %rule.metric, "Non-finite metric value, rule skipped");
                continue;
            }
            if !rule.matches(value) {
                continue;
            }

            if let Some(alert) = self.fire(rule, value) {
                self.dispatch(rule, &alert).await;
                fired.push(alert);
            }
        }

        fired
    }

    /// Start the cooldown and record the alert, unless another pass won.
    fn fire(&self, rule: &AlertRule, value: f64) -> Option<Alert> {
        let now = Utc::now();
        let mut state = self.state.lock();
        if state.in_cooldown(rule, now) {
            return None;
        }

        let alert = Alert::from_rule(rule, value, now);
        state.last_trigger.insert(rule.name.clone(), now);
        state.active.insert(alert.id, alert.clone());
        state.history.push_back(alert.clone());
        while state.history.len() > self.config.max_history {
            state.history.pop_front();
        }
        state.evict_overflow(self.config.max_active, now);

        warn!(
            alert_id = %alert.id,
            rule = %rule.name,
            severity = %rule.severity,
            value = value,
            threshold = rule.threshold,
            "Alert fired"
        );
        Some(alert)
    }

    /// Deliver to every configured channel concurrently. A failing or
    /// missing channel is logged and never affects the others.
    async fn dispatch(&self, rule: &AlertRule, alert: &Alert) {
        let payload = AlertPayload::from_alert(alert, &self.config.source);

        let deliveries = rule.channels.iter().filter_map(|kind| {
            match self.channels.get(kind).map(|entry| entry.value().clone()) {
                Some(channel) => Some(channel),
                None => {
                    debug!(channel = %kind, rule = %rule.name, "No channel registered, skipped");
                    None
                }
            }
        });
        let channels: Vec<Arc<dyn NotificationChannel>> = deliveries.collect();

        let results = join_all(channels.iter().map(|channel| channel.send(&payload))).await;
        for (channel, result) in channels.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    channel = %channel.kind(),
                    alert_id = %alert.id,
                    error = %e,
                    "Alert delivery failed"
                );
            }
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Mark an active alert as acknowledged by `user`.
    pub fn acknowledge(&self, id: &AlertId, user: &str) -> AlertResult<Alert> {
        let mut state = self.state.lock();
        let alert = state.active.get_mut(id).ok_or(AlertError::NotFound(*id))?;
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_by = Some(user.to_string());
        alert.acknowledged_at = Some(Utc::now());

        let alert = alert.clone();
        state.update_history(&alert);
        info!(alert_id = %id, user = user, "Alert acknowledged");
        Ok(alert)
    }

    /// Resolve an alert, removing it from the active set.
    pub fn resolve(&self, id: &AlertId) -> AlertResult<Alert> {
        let mut state = self.state.lock();
        let mut alert = state.active.remove(id).ok_or(AlertError::NotFound(*id))?;
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(Utc::now());

        state.update_history(&alert);
        info!(alert_id = %id, rule = %alert.rule_name, "Alert resolved");
        Ok(alert)
    }

    /// Drop history entries older than `days`. Returns how many were removed.
    ///
    /// Active alerts are left alone; `max_active` bounds that set.
    pub fn cleanup_old_alerts(&self, days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));
        let mut state = self.state.lock();
        let before = state.history.len();
        state.history.retain(|alert| alert.timestamp >= cutoff);
        let removed = before - state.history.len();
        if removed > 0 {
            info!(removed = removed, days = days, "Pruned alert history");
        }
        removed
    }

    // ── Queries ─────────────────────────────────────────────────────────

    /// Active and acknowledged alerts, newest first.
    pub fn get_active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.state.lock().active.values().cloned().collect();
        alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        alerts
    }

    /// The `limit` most recent alerts in chronological order.
    pub fn get_alert_history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock();
        let skip = state.history.len().saturating_sub(limit);
        state.history.iter().skip(skip).cloned().collect()
    }

    pub fn get_alerts_by_severity(&self, severity: AlertSeverity) -> Vec<Alert> {
        self.state
            .lock()
            .history
            .iter()
            .filter(|alert| alert.severity == severity)
            .cloned()
            .collect()
    }

    pub fn alert_stats(&self) -> AlertStats {
        let state = self.state.lock();
        let mut severity_distribution = BTreeMap::new();
        let mut resolved = 0;
        for alert in &state.history {
            *severity_distribution.entry(alert.severity).or_insert(0) += 1;
            if alert.status == AlertStatus::Resolved {
                resolved += 1;
            }
        }

        AlertStats {
            total: state.history.len(),
            active: state.active.len(),
            acknowledged: state
                .active
                .values()
                .filter(|a| a.status == AlertStatus::Acknowledged)
                .count(),
            resolved,
            severity_distribution,
            last_alert: state.history.back().map(|a| a.timestamp),
        }
    }

    /// Warning while an unacknowledged critical alert is active.
    pub fn health(&self) -> ComponentHealth {
        let pending = self
            .state
            .lock()
            .active
            .values()
            .filter(|a| a.severity == AlertSeverity::Critical && a.status == AlertStatus::Active)
            .count();
        if pending == 0 {
            ComponentHealth::healthy("alerts")
        } else {
            ComponentHealth::with_status(
                "alerts",
                HealthStatus::Warning,
                format!("{} unacknowledged critical alerts", pending),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MemoryChannel;
    use crate::types::{AlertChannelKind, ComparisonOperator};
    use std::time::Duration;
    use vigil_types::StaticMetrics;

    fn cpu_rule() -> AlertRule {
        AlertRule::new("cpu", "cpu", ComparisonOperator::GreaterThan, 80.0)
            .with_severity(AlertSeverity::Critical)
            .with_channels(vec![AlertChannelKind::Dashboard])
    }

    fn engine_with(metrics: Arc<StaticMetrics>) -> AlertEngine {
        AlertEngine::new(AlertEngineConfig::default(), metrics)
    }

    #[tokio::test]
    async fn test_rule_fires_and_lifecycle() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0);
        let engine = engine_with(metrics);
        engine.add_rule(cpu_rule()).unwrap();

        let fired = engine.check_alerts().await;
        assert_eq!(fired.len(), 1);

        let active = engine.get_active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(engine.health().status, HealthStatus::Warning);
        assert_eq!(active[0].severity, AlertSeverity::Critical);
        assert_eq!(active[0].message, "cpu: 85 > 80");

        let acked = engine.acknowledge(&active[0].id, "oncall").unwrap();
        assert_eq!(acked.status, AlertStatus::Acknowledged);
        assert_eq!(acked.acknowledged_by.as_deref(), Some("oncall"));
        assert_eq!(engine.alert_stats().acknowledged, 1);

        assert!(engine.health().status.is_healthy());

        let resolved = engine.resolve(&active[0].id).unwrap();
        assert_eq!(resolved.status, AlertStatus::Resolved);
        assert!(resolved.resolved_at.is_some());
        assert!(engine.get_active_alerts().is_empty());

        let history = engine.get_alert_history(10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, AlertStatus::Resolved);
    }

    #[tokio::test]
    async fn test_cooldown_suppresses_refire() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 90.0);
        let engine = engine_with(metrics);
        engine
            .add_rule(cpu_rule().with_cooldown(Duration::from_millis(100)))
            .unwrap();

        assert_eq!(engine.check_alerts().await.len(), 1);
        assert_eq!(engine.check_alerts().await.len(), 0);

        // Resolution does not lift the cooldown
        let id = engine.get_active_alerts()[0].id;
        engine.resolve(&id).unwrap();
        assert_eq!(engine.check_alerts().await.len(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(engine.check_alerts().await.len(), 1);
        assert_eq!(engine.alert_stats().total, 2);
    }

    #[tokio::test]
    async fn test_cooldown_only_starts_on_firing() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 50.0);
        let engine = engine_with(metrics.clone());
        engine.add_rule(cpu_rule()).unwrap();

        assert!(engine.check_alerts().await.is_empty());

        metrics.set("cpu", 95.0);
        assert_eq!(engine.check_alerts().await.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_passes_fire_once() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 99.0);
        let engine = Arc::new(engine_with(metrics));
        engine.add_rule(cpu_rule()).unwrap();

        let passes: Vec<_> = (0..8)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.check_alerts().await.len() })
            })
            .collect();

        let mut total = 0;
        for pass in passes {
            total += pass.await.unwrap();
        }
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_channel_failure_is_isolated() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0);
        metrics.set("mem", 95.0);
        let engine = engine_with(metrics);

        let broken = Arc::new(MemoryChannel::failing(AlertChannelKind::Email));
        let dashboard = Arc::new(MemoryChannel::new(AlertChannelKind::Dashboard));
        engine.register_channel(broken);
        engine.register_channel(dashboard.clone());

        let channels = vec![
            AlertChannelKind::Email,
            AlertChannelKind::Sms,
            AlertChannelKind::Dashboard,
        ];
        engine.add_rule(cpu_rule().with_channels(channels.clone())).unwrap();
        engine
            .add_rule(
                AlertRule::new("mem", "mem", ComparisonOperator::GreaterOrEqual, 90.0)
                    .with_channels(channels),
            )
            .unwrap();

        let fired = engine.check_alerts().await;
        assert_eq!(fired.len(), 2);

        let delivered = dashboard.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!(delivered[0].rule_name, "cpu");
        assert_eq!(delivered[0].source, "vigil");
        assert_eq!(delivered[1].operator, ComparisonOperator::GreaterOrEqual);
    }

    #[tokio::test]
    async fn test_missing_metric_and_disabled_rules_skip() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0);
        let engine = engine_with(metrics);
        engine.add_rule(cpu_rule().disabled()).unwrap();
        engine
            .add_rule(AlertRule::new("disk", "disk", ComparisonOperator::GreaterThan, 1.0))
            .unwrap();

        assert!(engine.check_alerts().await.is_empty());

        engine.set_rule_enabled("cpu", true).unwrap();
        assert_eq!(engine.check_alerts().await.len(), 1);
    }

    #[test]
    fn test_rule_management() {
        let engine = engine_with(Arc::new(StaticMetrics::new()));
        engine.add_rule(cpu_rule()).unwrap();
        engine.add_rule(cpu_rule().with_severity(AlertSeverity::Info)).unwrap();

        let rules = engine.rules();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].severity, AlertSeverity::Info);

        assert!(engine.remove_rule("cpu").is_ok());
        assert!(matches!(engine.remove_rule("cpu"), Err(AlertError::RuleNotFound(_))));
        assert!(engine
            .add_rule(AlertRule::new(" ", "x", ComparisonOperator::Equal, 1.0))
            .is_err());
    }

    #[test]
    fn test_unknown_alert_id() {
        let engine = engine_with(Arc::new(StaticMetrics::new()));
        let id = AlertId::generate();
        assert!(matches!(engine.acknowledge(&id, "me"), Err(AlertError::NotFound(_))));
        assert!(matches!(engine.resolve(&id), Err(AlertError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_stats_history_and_cleanup() {
        let metrics = Arc::new(StaticMetrics::new());
        metrics.set("cpu", 85.0);
        metrics.set("q", 3.0);
        let engine = engine_with(metrics);
        engine.add_rule(cpu_rule()).unwrap();
        engine
            .add_rule(
                AlertRule::new("queue", "q", ComparisonOperator::NotEqual, 0.0)
                    .with_severity(AlertSeverity::Info),
            )
            .unwrap();

        engine.check_alerts().await;
        let stats = engine.alert_stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.severity_distribution[&AlertSeverity::Critical], 1);
        assert!(stats.last_alert.is_some());

        assert_eq!(engine.get_alerts_by_severity(AlertSeverity::Info).len(), 1);
        assert_eq!(engine.get_alert_history(1).len(), 1);

        // Nothing is older than a day
        assert_eq!(engine.cleanup_old_alerts(1), 0);
        assert_eq!(engine.cleanup_old_alerts(0), 2);
        assert!(engine.get_alert_history(10).is_empty());
    }

    #[tokio::test]
    async fn test_active_alerts_are_capped() {
        let metrics = Arc::new(StaticMetrics::new());
        for name in ["a", "b", "c"] {
            metrics.set(name, 10.0);
        }
        let engine = AlertEngine::new(
            AlertEngineConfig {
                max_active: 2,
                ..AlertEngineConfig::default()
            },
            metrics,
        );
        for name in ["a", "b", "c"] {
            engine
                .add_rule(AlertRule::new(name, name, ComparisonOperator::GreaterThan, 1.0))
                .unwrap();
        }

        assert_eq!(engine.check_alerts().await.len(), 3);

        let active = engine.get_active_alerts();
        assert_eq!(active.len(), 2);
        assert!(active.iter().all(|a| a.rule_name != "a"));

        let history = engine.get_alert_history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].rule_name, "a");
        assert_eq!(history[0].status, AlertStatus::Resolved);
        assert!(history[0].resolved_at.is_some());
        assert_eq!(engine.alert_stats().resolved, 1);
    }

    #[test]
    fn test_default_rules_loaded() {
        let engine = AlertEngine::with_default_rules(
            AlertEngineConfig::default(),
            Arc::new(StaticMetrics::new()),
        );
        assert_eq!(engine.rules().len(), 5);
    }
}
