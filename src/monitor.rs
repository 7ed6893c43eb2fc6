use crate::maintenance::EXPIRY_MINUTES;
use crate::schema::{QueueDepth, RateLimit};
use crate::store;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{info, warn};

/// Warn once more than this many dead-letter rows arrived in 24 hours.
pub const DLQ_24H_WARNING: i64 = 10;
/// Warn once more than this many batches went terminal-error in 24 hours.
pub const ERROR_24H_WARNING: i64 = 20;
/// Critical once more than this many batches are stalled in processing.
pub const STALLED_CRITICAL: i64 = 5;
/// A processing batch counts as stalled after this many minutes.
pub const STALLED_MINUTES: i32 = 30;
/// Warn once a rate-limit window drops below this remaining percentage.
pub const RATE_REMAINING_WARNING_PERCENT: f64 = 20.0;

/// Alert severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    /// Worth a look.
    Warning,
    /// Triggers auto-remediation when paired with stalled batches.
    Critical,
}

/// One threshold violation.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Severity
    pub level: AlertLevel,
    /// Human-readable description
    pub message: String,
    /// Which metric fired
    pub metric: String,
    /// The threshold it crossed
    pub threshold: i64,
    /// API name, for rate-limit alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
    /// Endpoint, for rate-limit alerts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Rate-limit state as reported in the health metrics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    /// Upstream API name
    pub api_name: String,
    /// Endpoint within that API
    pub endpoint: String,
    /// Requests left in the window
    pub remaining: i32,
    /// Window size
    pub limit: i32,
    /// Remaining as a percentage of the window (100 when untracked)
    pub remaining_percent: f64,
    /// When the window resets
    pub reset_at: Option<DateTime<Utc>>,
}

impl From<&RateLimit> for RateLimitStatus {
    fn from(row: &RateLimit) -> Self {
        let remaining_percent = if row.requests_limit > 0 {
            row.requests_remaining as f64 * 100.0 / row.requests_limit as f64
        } else {
            100.0
        };
        Self {
            api_name: row.api_name.clone(),
            endpoint: row.endpoint.clone(),
            remaining: row.requests_remaining,
            limit: row.requests_limit,
            remaining_percent,
            reset_at: row.reset_at,
        }
    }
}

/// The sampled health metrics.
#[derive(Debug, Clone, Serialize)]
pub struct HealthMetrics {
    /// Dead-letter rows created in the last 24 hours
    pub dead_letter_items_24h: i64,
    /// Batches that went terminal-error in the last 24 hours
    pub error_batches_24h: i64,
    /// Batches processing for longer than [`STALLED_MINUTES`]
    pub stalled_batches: i64,
    /// Per-type queue breakdown
    pub queue_depths: Vec<QueueDepth>,
    /// Tracked rate-limit windows
    pub rate_limits: Vec<RateLimitStatus>,
}

/// A remediation the monitor performed on its own.
#[derive(Debug, Clone, Serialize)]
pub struct RemediationAction {
    /// What was done, e.g. `reset_stalled_batches`
    pub action: String,
    /// How many rows it touched
    pub count: u64,
}

/// What happened to the alerts of one report.
#[derive(Debug, Clone, Serialize)]
pub struct AlertDispatch {
    /// Whether anything was delivered
    pub sent: bool,
    /// Number of alerts delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Why nothing was delivered
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Delivery timestamp
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// One monitor invocation's output.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// When the sample was taken
    pub timestamp: DateTime<Utc>,
    /// Threshold violations, if any
    pub alerts: Vec<Alert>,
    /// The sampled metrics
    pub metrics: HealthMetrics,
    /// Auto-remediations performed
    pub actions: Vec<RemediationAction>,
    /// Alert delivery outcome
    pub alert_sent: AlertDispatch,
}

/// Where alerts are delivered. Log-only by default; pluggable.
pub trait AlertSink: Send + Sync {
    /// Deliver the alerts, reporting what happened.
    fn send<'a>(&'a self, alerts: &'a [Alert]) -> BoxFuture<'a, AlertDispatch>;
}

/// Default sink: writes each alert to the log.
pub struct LogAlertSink;

impl AlertSink for LogAlertSink {
    fn send<'a>(&'a self, alerts: &'a [Alert]) -> BoxFuture<'a, AlertDispatch> {
        async move {
            if alerts.is_empty() {
                return AlertDispatch {
                    sent: false,
                    count: None,
                    reason: Some("no_alerts".to_string()),
                    timestamp: None,
                };
            }

            for alert in alerts {
                warn!(level = ?alert.level, metric = %alert.metric, "{}", alert.message);
            }

            AlertDispatch {
                sent: true,
                count: Some(alerts.len()),
                reason: None,
                timestamp: Some(Utc::now()),
            }
        }
        .boxed()
    }
}

/// Pure threshold evaluation over a metric sample.
pub fn evaluate_alerts(metrics: &HealthMetrics) -> Vec<Alert> {
    let mut alerts = Vec::new();

    if metrics.dead_letter_items_24h > DLQ_24H_WARNING {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            message: format!(
                "{} items entered the dead-letter queue in the last 24h",
                metrics.dead_letter_items_24h
            ),
            metric: "dead_letter_items_24h".to_string(),
            threshold: DLQ_24H_WARNING,
            api: None,
            endpoint: None,
        });
    }

    if metrics.error_batches_24h > ERROR_24H_WARNING {
        alerts.push(Alert {
            level: AlertLevel::Warning,
            message: format!(
                "{} batches failed terminally in the last 24h",
                metrics.error_batches_24h
            ),
            metric: "error_batches_24h".to_string(),
            threshold: ERROR_24H_WARNING,
            api: None,
            endpoint: None,
        });
    }

    if metrics.stalled_batches > STALLED_CRITICAL {
        alerts.push(Alert {
            level: AlertLevel::Critical,
            message: format!(
                "{} batches stuck in processing for over {STALLED_MINUTES} minutes",
                metrics.stalled_batches
            ),
            metric: "stalled_batches".to_string(),
            threshold: STALLED_CRITICAL,
            api: None,
            endpoint: None,
        });
    }

    for rate_limit in &metrics.rate_limits {
        if rate_limit.limit > 0 && rate_limit.remaining_percent < RATE_REMAINING_WARNING_PERCENT {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!(
                    "{}/{} has {:.0}% of its rate-limit window left",
                    rate_limit.api_name, rate_limit.endpoint, rate_limit.remaining_percent
                ),
                metric: "rate_limit_remaining_percent".to_string(),
                threshold: RATE_REMAINING_WARNING_PERCENT as i64,
                api: Some(rate_limit.api_name.clone()),
                endpoint: Some(rate_limit.endpoint.clone()),
            });
        }
    }

    alerts
}

/// Samples health metrics, raises alerts by threshold, and auto-remediates
/// critical conditions.
pub struct Monitor {
    pool: PgPool,
    sink: Arc<dyn AlertSink>,
}

impl Monitor {
    /// Creates a monitor with the log-only alert sink.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            sink: Arc::new(LogAlertSink),
        }
    }

    /// Replaces the alert sink.
    pub fn with_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.sink = sink;
        self
    }

    /// One monitor invocation: sample, evaluate, remediate, dispatch.
    pub async fn run(&self) -> anyhow::Result<HealthReport> {
        let metrics = HealthMetrics {
            dead_letter_items_24h: store::dead_letter_count_since(&self.pool, 24).await?,
            error_batches_24h: store::error_batch_count_since(&self.pool, 24).await?,
            stalled_batches: store::stalled_batch_count(&self.pool, STALLED_MINUTES).await?,
            queue_depths: store::queue_depths(&self.pool).await?,
            rate_limits: store::list_rate_limits(&self.pool)
                .await?
                .iter()
                .map(Into::into)
                .collect(),
        };

        let alerts = evaluate_alerts(&metrics);
        let mut actions = Vec::new();

        let has_critical = alerts.iter().any(|a| a.level == AlertLevel::Critical);
        if has_critical && metrics.stalled_batches > 0 {
            match store::reset_expired(&self.pool, EXPIRY_MINUTES).await {
                Ok(count) => {
                    info!(count, "auto-remediation reset stalled batches");
                    actions.push(RemediationAction {
                        action: "reset_stalled_batches".to_string(),
                        count,
                    });
                }
                Err(error) => warn!(%error, "auto-remediation failed"),
            }
        }

        let alert_sent = self.sink.send(&alerts).await;

        Ok(HealthReport {
            timestamp: Utc::now(),
            alerts,
            metrics,
            actions,
            alert_sent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_metrics() -> HealthMetrics {
        HealthMetrics {
            dead_letter_items_24h: 0,
            error_batches_24h: 0,
            stalled_batches: 0,
            queue_depths: Vec::new(),
            rate_limits: Vec::new(),
        }
    }

    #[test]
    fn clean_metrics_raise_nothing() {
        assert!(evaluate_alerts(&clean_metrics()).is_empty());
    }

    #[test]
    fn thresholds_are_strict_inequalities() {
        let mut metrics = clean_metrics();
        metrics.dead_letter_items_24h = DLQ_24H_WARNING;
        metrics.error_batches_24h = ERROR_24H_WARNING;
        metrics.stalled_batches = STALLED_CRITICAL;
        assert!(evaluate_alerts(&metrics).is_empty());
    }

    #[test]
    fn stalled_batches_above_threshold_are_critical() {
        let mut metrics = clean_metrics();
        metrics.stalled_batches = 7;

        let alerts = evaluate_alerts(&metrics);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].level, AlertLevel::Critical);
        assert_eq!(alerts[0].metric, "stalled_batches");
    }

    #[test]
    fn depleted_rate_limits_warn_per_endpoint() {
        let mut metrics = clean_metrics();
        metrics.rate_limits = vec![
            RateLimitStatus {
                api_name: "spotify".to_string(),
                endpoint: "search".to_string(),
                remaining: 5,
                limit: 100,
                remaining_percent: 5.0,
                reset_at: None,
            },
            RateLimitStatus {
                api_name: "genius".to_string(),
                endpoint: "search".to_string(),
                remaining: 80,
                limit: 100,
                remaining_percent: 80.0,
                reset_at: None,
            },
        ];

        let alerts = evaluate_alerts(&metrics);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].api.as_deref(), Some("spotify"));
        assert_eq!(alerts[0].level, AlertLevel::Warning);
    }
}
