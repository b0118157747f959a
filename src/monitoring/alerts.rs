use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::{AlertSeverity, AlertType};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ErrorRateThreshold {
    pub window_minutes: u64,
    pub threshold: f64,
}

/// Per-type suppression periods, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertCooldowns {
    pub connection_failure_seconds: u64,
    pub pool_exhaustion_seconds: u64,
    pub slow_query_seconds: u64,
    pub high_error_rate_seconds: u64,
    pub transaction_timeout_seconds: u64,
    pub deadlock_seconds: u64,
    pub performance_degradation_seconds: u64,
}

impl Default for AlertCooldowns {
    fn default() -> Self {
        Self {
            connection_failure_seconds: 300,
            pool_exhaustion_seconds: 600,
            slow_query_seconds: 900,
            high_error_rate_seconds: 300,
            transaction_timeout_seconds: 300,
            deadlock_seconds: 180,
            performance_degradation_seconds: 1800,
        }
    }
}

impl AlertCooldowns {
    /// Every alert type fires on every trigger.
    pub fn disabled() -> Self {
        Self {
            connection_failure_seconds: 0,
            pool_exhaustion_seconds: 0,
            slow_query_seconds: 0,
            high_error_rate_seconds: 0,
            transaction_timeout_seconds: 0,
            deadlock_seconds: 0,
            performance_degradation_seconds: 0,
        }
    }

    pub fn for_type(&self, alert_type: AlertType) -> ChronoDuration {
        let seconds = match alert_type {
            AlertType::ConnectionFailure => self.connection_failure_seconds,
            AlertType::PoolExhaustion => self.pool_exhaustion_seconds,
            AlertType::SlowQuery => self.slow_query_seconds,
            AlertType::HighErrorRate => self.high_error_rate_seconds,
            AlertType::TransactionTimeout => self.transaction_timeout_seconds,
            AlertType::Deadlock => self.deadlock_seconds,
            AlertType::PerformanceDegradation => self.performance_degradation_seconds,
        };
        ChronoDuration::seconds(seconds as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub error_rate_thresholds: Vec<ErrorRateThreshold>,
    /// Errors of one type among the most recent `consecutive_window` that trigger a
    /// performance-degradation alert.
    pub consecutive_failures: usize,
    pub consecutive_window: usize,
    /// Execution time above which a statement is tracked as a `SlowQuery` error.
    pub slow_query_alert_threshold_seconds: f64,
    pub max_error_history: usize,
    pub max_alert_history: usize,
    /// Unresolved alerts older than this are resolved as expired. Zero keeps them forever.
    pub max_active_alert_age_seconds: u64,
    pub cooldowns: AlertCooldowns,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            error_rate_thresholds: vec![
                ErrorRateThreshold {
                    window_minutes: 5,
                    threshold: 0.10,
                },
                ErrorRateThreshold {
                    window_minutes: 15,
                    threshold: 0.05,
                },
                ErrorRateThreshold {
                    window_minutes: 60,
                    threshold: 0.02,
                },
            ],
            consecutive_failures: 5,
            consecutive_window: 10,
            slow_query_alert_threshold_seconds: 2.0,
            max_error_history: 1000,
            max_alert_history: 500,
            max_active_alert_age_seconds: 86_400,
            cooldowns: AlertCooldowns::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Alert {
    pub alert_id: String,
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_note: Option<String>,
    pub metadata: HashMap<String, Value>,
}

/// An alert a rule wants to raise, before cooldown is applied.
#[derive(Debug, Clone)]
pub struct AlertCandidate {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub title: String,
    pub message: String,
    pub cooldown_key: String,
    pub metadata: HashMap<String, Value>,
}

impl AlertCandidate {
    pub fn new(
        alert_type: AlertType,
        severity: AlertSeverity,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            alert_type,
            severity,
            title: title.into(),
            message: message.into(),
            cooldown_key: alert_type.as_str().to_string(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_cooldown_key(mut self, key: impl Into<String>) -> Self {
        self.cooldown_key = key.into();
        self
    }

    pub fn with_metadata(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }
}

/// Destination for raised alerts. Dispatch runs on a spawned task.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Writes a severity-graded log line per alert.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl NotificationHandler for LogNotifier {
    fn name(&self) -> &str {
        "log"
    }

    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        let marker = match alert.severity {
            AlertSeverity::Low => "ℹ️",
            AlertSeverity::Medium => "⚠️",
            AlertSeverity::High => "🚨",
            AlertSeverity::Critical => "🔥",
        };
        match alert.severity {
            AlertSeverity::Critical | AlertSeverity::High => {
                error!("{} ALERT: {} - {}", marker, alert.title, alert.message)
            }
            AlertSeverity::Medium => warn!("{} ALERT: {} - {}", marker, alert.title, alert.message),
            AlertSeverity::Low => info!("{} ALERT: {} - {}", marker, alert.title, alert.message),
        }
        Ok(())
    }
}

/// Forwards alerts into an mpsc channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::Sender<Alert>,
}

impl ChannelNotifier {
    pub fn new(sender: mpsc::Sender<Alert>) -> Self {
        Self { sender }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<Alert>) {
        let (sender, receiver) = mpsc::channel(buffer);
        (Self::new(sender), receiver)
    }
}

#[async_trait]
impl NotificationHandler for ChannelNotifier {
    fn name(&self) -> &str {
        "channel"
    }

    async fn notify(&self, alert: &Alert) -> anyhow::Result<()> {
        self.sender
            .send(alert.clone())
            .await
            .map_err(|_| anyhow::anyhow!("alert channel closed"))
    }
}

#[derive(Default)]
struct AlertState {
    active: HashMap<String, Alert>,
    history: VecDeque<Alert>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

pub struct AlertManager {
    config: AlertConfig,
    state: Mutex<AlertState>,
    handlers: RwLock<Vec<Arc<dyn NotificationHandler>>>,
}

impl AlertManager {
    pub fn new(config: AlertConfig) -> Self {
        Self {
            config,
            state: Mutex::new(AlertState::default()),
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &AlertConfig {
        &self.config
    }

    pub fn add_notification_handler(&self, handler: Arc<dyn NotificationHandler>) {
        info!("Registered alert notification handler: {}", handler.name());
        self.handlers.write().push(handler);
    }

    /// Raise an alert unless its cooldown key is still suppressed.
    ///
    /// The cooldown check and the insertion happen under one lock, so concurrent triggers
    /// of the same key produce a single alert.
    pub fn raise(&self, candidate: AlertCandidate) -> Option<Alert> {
        self.raise_at(candidate, Utc::now())
    }

    pub(crate) fn raise_at(&self, candidate: AlertCandidate, now: DateTime<Utc>) -> Option<Alert> {
        let alert = {
            let mut state = self.state.lock();
            self.expire_stale(&mut state, now);
            if let Some(until) = state.cooldowns.get(&candidate.cooldown_key) {
                if now < *until {
                    debug!(
                        "Alert {} suppressed by cooldown until {}",
                        candidate.cooldown_key, until
                    );
                    return None;
                }
            }

            let alert = Alert {
                alert_id: format!("{}_{}", candidate.alert_type, Uuid::new_v4().simple()),
                alert_type: candidate.alert_type,
                severity: candidate.severity,
                title: candidate.title,
                message: candidate.message,
                timestamp: now,
                resolved: false,
                resolved_at: None,
                resolution_note: None,
                metadata: candidate.metadata,
            };

            let cooldown = self.config.cooldowns.for_type(alert.alert_type);
            state.cooldowns.insert(candidate.cooldown_key, now + cooldown);
            state.active.insert(alert.alert_id.clone(), alert.clone());
            if self.config.max_alert_history > 0 {
                while state.history.len() >= self.config.max_alert_history {
                    state.history.pop_front();
                }
                state.history.push_back(alert.clone());
            }
            alert
        };

        warn!(
            "ALERT [{}] {}: {}",
            alert.severity.as_str().to_uppercase(),
            alert.title,
            alert.message
        );
        self.dispatch(&alert);
        Some(alert)
    }

    fn dispatch(&self, alert: &Alert) {
        let handlers = self.handlers.read().clone();
        if handlers.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, skipping notification for {}", alert.alert_id);
            return;
        };
        let alert = alert.clone();
        runtime.spawn(async move {
            for handler in handlers {
                if let Err(e) = handler.notify(&alert).await {
                    error!(
                        "Failed to send alert notification via {}: {}",
                        handler.name(),
                        e
                    );
                }
            }
        });
    }

    pub fn resolve_alert(&self, alert_id: &str, resolution_note: &str) -> bool {
        let mut state = self.state.lock();
        if !resolve_locked(&mut state, alert_id, resolution_note, Utc::now()) {
            return false;
        }
        info!("Alert resolved: {} - {}", alert_id, resolution_note);
        true
    }

    /// Resolve unresolved alerts past `max_active_alert_age_seconds`. Returns how many
    /// expired.
    pub fn expire_stale_alerts(&self) -> usize {
        self.expire_stale_at(Utc::now())
    }

    pub(crate) fn expire_stale_at(&self, now: DateTime<Utc>) -> usize {
        let mut state = self.state.lock();
        self.expire_stale(&mut state, now)
    }

    fn expire_stale(&self, state: &mut AlertState, now: DateTime<Utc>) -> usize {
        if self.config.max_active_alert_age_seconds == 0 {
            return 0;
        }
        let max_age = ChronoDuration::seconds(
            i64::try_from(self.config.max_active_alert_age_seconds).unwrap_or(i64::MAX),
        );
        let stale: Vec<String> = state
            .active
            .values()
            .filter(|a| now.signed_duration_since(a.timestamp) > max_age)
            .map(|a| a.alert_id.clone())
            .collect();
        for alert_id in &stale {
            resolve_locked(state, alert_id, "expired without resolution", now);
        }
        if !stale.is_empty() {
            info!("Expired {} unresolved alerts", stale.len());
        }
        stale.len()
    }

    /// Resolve every active alert matching `predicate`. Returns how many were resolved.
    pub fn resolve_where(&self, predicate: impl Fn(&Alert) -> bool, resolution_note: &str) -> usize {
        let ids: Vec<String> = self
            .state
            .lock()
            .active
            .values()
            .filter(|a| predicate(*a))
            .map(|a| a.alert_id.clone())
            .collect();
        ids.iter()
            .filter(|id| self.resolve_alert(id, resolution_note))
            .count()
    }

    pub fn active_alerts(&self) -> Vec<Alert> {
        let mut alerts: Vec<Alert> = self.state.lock().active.values().cloned().collect();
        alerts.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        alerts
    }

    pub fn active_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Most recent `limit` alerts, oldest first.
    pub fn alert_history(&self, limit: usize) -> Vec<Alert> {
        let state = self.state.lock();
        let start = state.history.len().saturating_sub(limit);
        state.history.iter().skip(start).cloned().collect()
    }

    pub fn active_counts_by_severity(&self) -> HashMap<AlertSeverity, usize> {
        let mut counts = HashMap::new();
        for alert in self.state.lock().active.values() {
            *counts.entry(alert.severity).or_insert(0) += 1;
        }
        counts
    }

    pub fn reset(&self) {
        *self.state.lock() = AlertState::default();
        info!("Alert state has been reset");
    }
}

fn resolve_locked(
    state: &mut AlertState,
    alert_id: &str,
    resolution_note: &str,
    now: DateTime<Utc>,
) -> bool {
    let Some(mut alert) = state.active.remove(alert_id) else {
        return false;
    };
    alert.resolved = true;
    alert.resolved_at = Some(now);
    alert.resolution_note = Some(resolution_note.to_string());

    if let Some(entry) = state.history.iter_mut().find(|a| a.alert_id == alert_id) {
        *entry = alert;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tracing_test::traced_test;

    fn candidate(alert_type: AlertType) -> AlertCandidate {
        AlertCandidate::new(alert_type, AlertSeverity::High, "title", "message")
    }

    #[test]
    fn test_cooldown_suppresses_repeat() {
        let manager = AlertManager::new(AlertConfig::default());
        assert!(manager.raise(candidate(AlertType::PoolExhaustion)).is_some());
        assert!(manager.raise(candidate(AlertType::PoolExhaustion)).is_none());
        // Independent key
        assert!(manager.raise(candidate(AlertType::Deadlock)).is_some());
        assert_eq!(manager.active_count(), 2);
    }

    #[test]
    fn test_cooldown_expires_after_its_duration() {
        let manager = AlertManager::new(AlertConfig::default());
        let start = Utc::now();
        // Deadlock cooldown is 180 seconds.
        assert!(manager.raise_at(candidate(AlertType::Deadlock), start).is_some());
        assert!(manager
            .raise_at(candidate(AlertType::Deadlock), start + ChronoDuration::seconds(179))
            .is_none());
        assert!(manager
            .raise_at(candidate(AlertType::Deadlock), start + ChronoDuration::seconds(180))
            .is_some());
        assert_eq!(manager.alert_history(10).len(), 2);
    }

    #[test]
    fn test_stale_active_alerts_expire() {
        let manager = AlertManager::new(AlertConfig {
            max_active_alert_age_seconds: 3600,
            ..AlertConfig::default()
        });
        let start = Utc::now();
        let old = manager.raise_at(candidate(AlertType::SlowQuery), start).unwrap();
        let recent = manager
            .raise_at(candidate(AlertType::PoolExhaustion), start + ChronoDuration::minutes(30))
            .unwrap();

        assert_eq!(manager.expire_stale_at(start + ChronoDuration::minutes(59)), 0);
        assert_eq!(manager.expire_stale_at(start + ChronoDuration::minutes(61)), 1);

        let active = manager.active_alerts();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].alert_id, recent.alert_id);
        let expired = manager
            .alert_history(10)
            .into_iter()
            .find(|a| a.alert_id == old.alert_id)
            .unwrap();
        assert!(expired.resolved);
        assert_eq!(expired.resolution_note.as_deref(), Some("expired without resolution"));
    }

    #[test]
    fn test_raise_expires_stale_alerts_first() {
        let manager = AlertManager::new(AlertConfig {
            max_active_alert_age_seconds: 60,
            cooldowns: AlertCooldowns::disabled(),
            ..AlertConfig::default()
        });
        let start = Utc::now();
        for _ in 0..3 {
            manager.raise_at(candidate(AlertType::Deadlock), start);
        }
        manager.raise_at(candidate(AlertType::Deadlock), start + ChronoDuration::minutes(5));
        assert_eq!(manager.active_count(), 1);

        let keep_forever = AlertManager::new(AlertConfig {
            max_active_alert_age_seconds: 0,
            ..AlertConfig::default()
        });
        keep_forever.raise_at(candidate(AlertType::SlowQuery), start);
        assert_eq!(keep_forever.expire_stale_at(start + ChronoDuration::days(365)), 0);
        assert_eq!(keep_forever.active_count(), 1);
    }

    #[test]
    fn test_cooldown_keys_are_independent_per_window() {
        let manager = AlertManager::new(AlertConfig::default());
        let five = candidate(AlertType::HighErrorRate).with_cooldown_key("high_error_rate_5min");
        let fifteen = candidate(AlertType::HighErrorRate).with_cooldown_key("high_error_rate_15min");
        assert!(manager.raise(five.clone()).is_some());
        assert!(manager.raise(fifteen).is_some());
        assert!(manager.raise(five).is_none());
    }

    #[test]
    fn test_disabled_cooldowns_allow_repeats() {
        let manager = AlertManager::new(AlertConfig {
            cooldowns: AlertCooldowns::disabled(),
            ..AlertConfig::default()
        });
        assert!(manager.raise(candidate(AlertType::SlowQuery)).is_some());
        assert!(manager.raise(candidate(AlertType::SlowQuery)).is_some());
        assert_eq!(manager.alert_history(10).len(), 2);
    }

    #[test]
    fn test_resolve_alert() {
        let manager = AlertManager::new(AlertConfig::default());
        let alert = manager
            .raise(candidate(AlertType::ConnectionFailure).with_metadata("connection_id", 3))
            .unwrap();

        assert!(manager.resolve_alert(&alert.alert_id, "database back online"));
        assert!(!manager.resolve_alert(&alert.alert_id, "again"));
        assert!(!manager.resolve_alert("missing", ""));
        assert!(manager.active_alerts().is_empty());

        let history = manager.alert_history(10);
        assert!(history[0].resolved);
        assert_eq!(history[0].resolution_note.as_deref(), Some("database back online"));
        assert_eq!(history[0].metadata["connection_id"], 3);
    }

    #[test]
    fn test_history_is_bounded() {
        let manager = AlertManager::new(AlertConfig {
            max_alert_history: 3,
            cooldowns: AlertCooldowns::disabled(),
            ..AlertConfig::default()
        });
        for _ in 0..5 {
            manager.raise(candidate(AlertType::Deadlock));
        }
        assert_eq!(manager.alert_history(100).len(), 3);
        assert_eq!(manager.alert_history(2).len(), 2);
        assert_eq!(manager.active_count(), 5);
    }

    #[test]
    fn test_resolve_where() {
        let manager = AlertManager::new(AlertConfig::default());
        manager.raise(candidate(AlertType::ConnectionFailure));
        manager.raise(candidate(AlertType::Deadlock));
        let resolved = manager.resolve_where(
            |a| a.alert_type == AlertType::ConnectionFailure,
            "recovered",
        );
        assert_eq!(resolved, 1);
        assert_eq!(manager.active_alerts()[0].alert_type, AlertType::Deadlock);
    }

    #[tokio::test]
    async fn test_channel_notifier_receives_alert() {
        let manager = AlertManager::new(AlertConfig::default());
        let (notifier, mut receiver) = ChannelNotifier::channel(4);
        manager.add_notification_handler(Arc::new(notifier));
        manager.add_notification_handler(Arc::new(LogNotifier));

        let raised = manager.raise(candidate(AlertType::TransactionTimeout)).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(1), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivered.alert_id, raised.alert_id);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_log_notifier_logs_alert() {
        let manager = AlertManager::new(AlertConfig::default());
        let alert = manager.raise(candidate(AlertType::Deadlock)).unwrap();
        LogNotifier.notify(&alert).await.unwrap();
        assert!(logs_contain("ALERT: title - message"));
    }

    #[test]
    fn test_raise_without_runtime_skips_dispatch() {
        let manager = AlertManager::new(AlertConfig::default());
        manager.add_notification_handler(Arc::new(LogNotifier));
        assert!(manager.raise(candidate(AlertType::SlowQuery)).is_some());
    }
}
