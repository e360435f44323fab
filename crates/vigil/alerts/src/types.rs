//! Alert rules, alerts and the normalized channel payload.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlertId(Uuid);

impl AlertId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for AlertId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for AlertId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Alert severity, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertSeverity::Info => write!(f, "info"),
            AlertSeverity::Warning => write!(f, "warning"),
            AlertSeverity::Error => write!(f, "error"),
            AlertSeverity::Critical => write!(f, "critical"),
        }
    }
}

/// Comparison applied as `value OP threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ComparisonOperator {
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            ComparisonOperator::GreaterThan => value > threshold,
            ComparisonOperator::LessThan => value < threshold,
            ComparisonOperator::GreaterOrEqual => value >= threshold,
            ComparisonOperator::LessOrEqual => value <= threshold,
            ComparisonOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ComparisonOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::GreaterOrEqual => ">=",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::Equal => "==",
            ComparisonOperator::NotEqual => "!=",
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ComparisonOperator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(ComparisonOperator::GreaterThan),
            "<" => Ok(ComparisonOperator::LessThan),
            ">=" => Ok(ComparisonOperator::GreaterOrEqual),
            "<=" => Ok(ComparisonOperator::LessOrEqual),
            "==" => Ok(ComparisonOperator::Equal),
            "!=" => Ok(ComparisonOperator::NotEqual),
            other => Err(format!("unknown comparison operator: {}", other)),
        }
    }
}

/// Delivery channel an alert can be routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannelKind {
    Email,
    Slack,
    Webhook,
    Sms,
    Dashboard,
}

impl fmt::Display for AlertChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannelKind::Email => write!(f, "email"),
            AlertChannelKind::Slack => write!(f, "slack"),
            AlertChannelKind::Webhook => write!(f, "webhook"),
            AlertChannelKind::Sms => write!(f, "sms"),
            AlertChannelKind::Dashboard => write!(f, "dashboard"),
        }
    }
}

/// Threshold rule over a single metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    /// Unique rule name.
    pub name: String,

    /// Metric read from the metric source.
    pub metric: String,

    /// Value compared against.
    pub threshold: f64,

    /// Comparison applied as `value OP threshold`.
    pub operator: ComparisonOperator,

    /// Severity of alerts raised by this rule.
    pub severity: AlertSeverity,

    /// Channels notified when the rule fires.
    pub channels: Vec<AlertChannelKind>,

    /// Minimum time between two firings of this rule.
    #[serde(with = "vigil_types::duration_serde", default = "default_cooldown")]
    pub cooldown: Duration,

    /// Disabled rules are never evaluated.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Text used in alert messages instead of the name.
    #[serde(default)]
    pub description: Option<String>,
}

fn default_cooldown() -> Duration {
    Duration::from_secs(5 * 60)
}

fn default_true() -> bool {
    true
}

impl AlertRule {
    /// A warning rule notifying the dashboard, with the default cooldown.
    pub fn new(
        name: impl Into<String>,
        metric: impl Into<String>,
        operator: ComparisonOperator,
        threshold: f64,
    ) -> Self {
        Self {
            name: name.into(),
            metric: metric.into(),
            threshold,
            operator,
            severity: AlertSeverity::Warning,
            channels: vec![AlertChannelKind::Dashboard],
            cooldown: default_cooldown(),
            enabled: true,
            description: None,
        }
    }

    pub fn with_severity(mut self, severity: AlertSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_channels(mut self, channels: Vec<AlertChannelKind>) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Whether `value` satisfies this rule.
    pub fn matches(&self, value: f64) -> bool {
        self.operator.evaluate(value, self.threshold)
    }

    /// Message text for an alert raised at `value`.
    pub fn message(&self, value: f64) -> String {
        format!(
            "{}: {} {} {}",
            self.description.as_deref().unwrap_or(&self.name),
            value,
            self.operator,
            self.threshold
        )
    }

    /// Stock rules covering host, pipeline, cache and API health.
    pub fn defaults() -> Vec<AlertRule> {
        vec![
            AlertRule::new("High CPU Usage", "system.cpu_percent", ComparisonOperator::GreaterThan, 80.0)
                .with_channels(vec![AlertChannelKind::Email, AlertChannelKind::Dashboard])
                .with_cooldown(Duration::from_secs(10 * 60))
                .with_description("CPU usage above 80%"),
            AlertRule::new("High Memory Usage", "system.memory_percent", ComparisonOperator::GreaterThan, 85.0)
                .with_channels(vec![AlertChannelKind::Email, AlertChannelKind::Dashboard])
                .with_cooldown(Duration::from_secs(10 * 60))
                .with_description("Memory usage above 85%"),
            AlertRule::new("Data Pipeline Error", "pipeline.error_rate", ComparisonOperator::GreaterThan, 5.0)
                .with_severity(AlertSeverity::Error)
                .with_channels(vec![
                    AlertChannelKind::Email,
                    AlertChannelKind::Slack,
                    AlertChannelKind::Dashboard,
                ])
                .with_description("Pipeline error rate above 5%"),
            AlertRule::new("Cache Miss Rate", "cache.miss_rate", ComparisonOperator::GreaterThan, 20.0)
                .with_cooldown(Duration::from_secs(15 * 60))
                .with_description("Cache miss rate above 20%"),
            AlertRule::new("API Response Time", "api.response_time_p95", ComparisonOperator::GreaterThan, 2000.0)
                .with_channels(vec![AlertChannelKind::Slack, AlertChannelKind::Dashboard])
                .with_description("API p95 response time above 2000ms"),
        ]
    }
}

/// Lifecycle of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Active,
    Acknowledged,
    Resolved,
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertStatus::Active => write!(f, "active"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

/// A fired rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: AlertId,
    pub rule_name: String,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub status: AlertStatus,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    pub fn from_rule(rule: &AlertRule, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: AlertId::generate(),
            rule_name: rule.name.clone(),
            metric: rule.metric.clone(),
            value,
            threshold: rule.threshold,
            operator: rule.operator,
            severity: rule.severity,
            message: rule.message(value),
            timestamp,
            status: AlertStatus::Active,
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_at: None,
        }
    }
}

/// Normalized payload handed to every notification channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub alert_id: AlertId,
    pub rule_name: String,
    pub severity: AlertSeverity,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub operator: ComparisonOperator,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
}

impl AlertPayload {
    pub fn from_alert(alert: &Alert, source: &str) -> Self {
        Self {
            alert_id: alert.id,
            rule_name: alert.rule_name.clone(),
            severity: alert.severity,
            metric: alert.metric.clone(),
            value: alert.value,
            threshold: alert.threshold,
            operator: alert.operator,
            message: alert.message.clone(),
            timestamp: alert.timestamp,
            source: source.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operators() {
        assert!(ComparisonOperator::GreaterThan.evaluate(85.0, 80.0));
        assert!(!ComparisonOperator::GreaterThan.evaluate(80.0, 80.0));
        assert!(ComparisonOperator::GreaterOrEqual.evaluate(80.0, 80.0));
        assert!(ComparisonOperator::LessThan.evaluate(1.0, 2.0));
        assert!(ComparisonOperator::LessOrEqual.evaluate(2.0, 2.0));
        assert!(ComparisonOperator::Equal.evaluate(3.0, 3.0));
        assert!(ComparisonOperator::NotEqual.evaluate(3.0, 4.0));
        assert!(!ComparisonOperator::NotEqual.evaluate(4.0, 4.0));
    }

    #[test]
    fn test_operator_parse_and_serde() {
        assert_eq!(">=".parse::<ComparisonOperator>().unwrap(), ComparisonOperator::GreaterOrEqual);
        assert!("=>".parse::<ComparisonOperator>().is_err());

        let json = serde_json::to_string(&ComparisonOperator::NotEqual).unwrap();
        assert_eq!(json, "\"!=\"");
    }

    #[test]
    fn test_message_prefers_description() {
        let rule = AlertRule::new("cpu", "system.cpu_percent", ComparisonOperator::GreaterThan, 80.0);
        assert_eq!(rule.message(85.0), "cpu: 85 > 80");

        let rule = rule.with_description("CPU hot");
        assert_eq!(rule.message(85.5), "CPU hot: 85.5 > 80");
    }

    #[test]
    fn test_default_rules() {
        let rules = AlertRule::defaults();
        assert_eq!(rules.len(), 5);
        let pipeline = rules.iter().find(|r| r.name == "Data Pipeline Error").unwrap();
        assert_eq!(pipeline.severity, AlertSeverity::Error);
        assert_eq!(pipeline.cooldown, Duration::from_secs(300));
        assert!(rules.iter().all(|r| r.enabled));
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: AlertRule = serde_json::from_str(
            r#"{"name":"q","metric":"queue.depth","threshold":100,"operator":">=","severity":"critical","channels":["slack"]}"#,
        )
        .unwrap();
        assert_eq!(rule.operator, ComparisonOperator::GreaterOrEqual);
        assert_eq!(rule.cooldown, Duration::from_secs(300));
        assert!(rule.enabled);
    }

    #[test]
    fn test_severity_order() {
        assert!(AlertSeverity::Critical > AlertSeverity::Error);
        assert!(AlertSeverity::Warning > AlertSeverity::Info);
    }
}
