//! Error records, rolling error rates and the rules that turn them into alerts.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use super::alerts::{Alert, AlertCandidate, AlertManager, ErrorRateThreshold};
use super::metrics::{window_cutoff, NoData, Windowed};
use super::{AlertSeverity, AlertType};
use crate::db::driver::DriverError;
use crate::db::statement::QueryType;
use crate::error::DatabaseError;

/// Error label used for slow statements. Excluded from error-rate numerators.
pub const SLOW_QUERY: &str = "SlowQuery";

/// Source of the operation count used as the error-rate denominator.
pub trait OperationCounter: Send + Sync {
    fn operations_since(&self, cutoff: DateTime<Utc>) -> usize;
}

#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub query_type: Option<QueryType>,
    pub table_name: Option<String>,
    pub execution_time: Option<f64>,
    pub connection_id: Option<u64>,
    pub context: HashMap<String, Value>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query_type(mut self, query_type: QueryType) -> Self {
        self.query_type = Some(query_type);
        self
    }

    pub fn table_name(mut self, table_name: Option<String>) -> Self {
        self.table_name = table_name;
        self
    }

    pub fn execution_time(mut self, seconds: f64) -> Self {
        self.execution_time = Some(seconds);
        self
    }

    pub fn connection_id(mut self, id: u64) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.context.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    pub error_type: String,
    pub error_message: String,
    pub query_type: Option<QueryType>,
    pub table_name: Option<String>,
    pub execution_time: Option<f64>,
    pub connection_id: Option<u64>,
    pub context: HashMap<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionIssue {
    Timeout,
    PoolExhausted,
    ConnectionFailed,
    ConnectionLost,
    Other,
}

impl ConnectionIssue {
    pub fn error_type(&self) -> &'static str {
        match self {
            ConnectionIssue::Timeout => "ConnectionTimeout",
            ConnectionIssue::PoolExhausted => "PoolExhausted",
            ConnectionIssue::ConnectionFailed => "ConnectionFailure",
            ConnectionIssue::ConnectionLost => "ConnectionLost",
            ConnectionIssue::Other => "ConnectionIssue",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorPattern {
    pub count: usize,
    pub first_occurrence: DateTime<Utc>,
    pub last_occurrence: DateTime<Utc>,
    pub avg_execution_time: Option<f64>,
    pub affected_tables: Vec<String>,
    pub most_common_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorSummary {
    pub time_window_minutes: u64,
    pub total_errors: usize,
    pub unique_error_types: usize,
    pub errors_per_minute: f64,
    pub error_rate: f64,
    pub error_patterns: BTreeMap<String, ErrorPattern>,
    pub active_alerts: usize,
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct WindowErrorRate {
    pub window_minutes: u64,
    pub error_rate: f64,
    pub threshold: f64,
}

struct ErrorState {
    history: VecDeque<ErrorRecord>,
    counts_by_type: HashMap<String, u64>,
    last_timestamp: DateTime<Utc>,
}

impl ErrorState {
    fn new() -> Self {
        Self {
            history: VecDeque::new(),
            counts_by_type: HashMap::new(),
            last_timestamp: Utc::now(),
        }
    }
}

pub struct ErrorTracker {
    alerts: Arc<AlertManager>,
    operations: Arc<dyn OperationCounter>,
    state: RwLock<ErrorState>,
}

impl ErrorTracker {
    pub fn new(alerts: Arc<AlertManager>, operations: Arc<dyn OperationCounter>) -> Self {
        Self {
            alerts,
            operations,
            state: RwLock::new(ErrorState::new()),
        }
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    /// Store an error and evaluate the alert rules against it. Returns the error id.
    pub fn track_error(&self, error_type: &str, error_message: &str, ctx: ErrorContext) -> String {
        let config = self.alerts.config();
        let (record, same_type_recent) = {
            let mut state = self.state.write();
            let timestamp = Utc::now().max(state.last_timestamp);
            state.last_timestamp = timestamp;

            let record = ErrorRecord {
                error_id: format!("{}_{}", error_type, Uuid::new_v4().simple()),
                timestamp,
                error_type: error_type.to_string(),
                error_message: error_message.to_string(),
                query_type: ctx.query_type,
                table_name: ctx.table_name,
                execution_time: ctx.execution_time,
                connection_id: ctx.connection_id,
                context: ctx.context,
            };

            if config.max_error_history > 0 {
                while state.history.len() >= config.max_error_history {
                    state.history.pop_front();
                }
                state.history.push_back(record.clone());
            }
            *state.counts_by_type.entry(error_type.to_string()).or_insert(0) += 1;

            let same_type_recent = state
                .history
                .iter()
                .rev()
                .take(config.consecutive_window)
                .filter(|e| e.error_type == error_type)
                .count();
            (record, same_type_recent)
        };

        error!("Database error tracked: {} - {}", error_type, error_message);

        for candidate in self.evaluate_rules(&record, same_type_recent) {
            self.alerts.raise(candidate);
        }
        record.error_id
    }

    fn evaluate_rules(&self, record: &ErrorRecord, same_type_recent: usize) -> Vec<AlertCandidate> {
        let config = self.alerts.config();
        let mut candidates = Vec::new();

        for rate in self.error_rates() {
            if rate.error_rate > rate.threshold {
                candidates.push(error_rate_alert(rate));
            }
        }

        let lowered = record.error_message.to_lowercase();
        match record.error_type.as_str() {
            "ConnectionFailure" => candidates.push(
                AlertCandidate::new(
                    AlertType::ConnectionFailure,
                    AlertSeverity::Critical,
                    "Database Connection Failure",
                    format!("Database connection failed: {}", record.error_message),
                )
                .with_metadata("error_id", record.error_id.clone())
                .with_metadata("connection_id", record.connection_id),
            ),
            "PoolExhausted" => candidates.push(
                AlertCandidate::new(
                    AlertType::PoolExhaustion,
                    AlertSeverity::High,
                    "Connection Pool Exhausted",
                    format!("Database connection pool is exhausted: {}", record.error_message),
                )
                .with_metadata("error_id", record.error_id.clone()),
            ),
            SLOW_QUERY => candidates.push(
                AlertCandidate::new(
                    AlertType::SlowQuery,
                    AlertSeverity::Medium,
                    "Slow Query Detected",
                    format!("Slow database query detected: {}", record.error_message),
                )
                .with_metadata("error_id", record.error_id.clone())
                .with_metadata("execution_time", record.execution_time)
                .with_metadata("query_type", record.query_type.map(|q| q.as_str()))
                .with_metadata("table_name", record.table_name.clone()),
            ),
            "TransactionTimeout" => candidates.push(
                AlertCandidate::new(
                    AlertType::TransactionTimeout,
                    AlertSeverity::High,
                    "Transaction Timeout",
                    format!("Database transaction timed out: {}", record.error_message),
                )
                .with_metadata("error_id", record.error_id.clone()),
            ),
            error_type if error_type == "Deadlock" || lowered.contains("deadlock") => candidates.push(
                AlertCandidate::new(
                    AlertType::Deadlock,
                    AlertSeverity::High,
                    "Database Deadlock Detected",
                    format!("Database deadlock occurred: {}", record.error_message),
                )
                .with_metadata("error_id", record.error_id.clone())
                .with_metadata("table_name", record.table_name.clone()),
            ),
            _ => {}
        }

        if same_type_recent >= config.consecutive_failures {
            candidates.push(
                AlertCandidate::new(
                    AlertType::PerformanceDegradation,
                    AlertSeverity::High,
                    format!("Consecutive {} Failures", record.error_type),
                    format!(
                        "Detected {} {} failures among the last {} errors",
                        same_type_recent, record.error_type, config.consecutive_window
                    ),
                )
                .with_metadata("error_type", record.error_type.clone())
                .with_metadata("failure_count", same_type_recent),
            );
        }

        candidates
    }

    pub fn track_driver_error(&self, err: &DriverError, ctx: ErrorContext) -> String {
        self.track_error(err.kind.as_str(), &err.message, ctx)
    }

    pub fn track_database_error(&self, err: &DatabaseError, ctx: ErrorContext) -> String {
        match err {
            DatabaseError::Driver(driver) => self.track_driver_error(driver, ctx),
            other => self.track_error(other.label(), &other.to_string(), ctx),
        }
    }

    /// Track a statement that ran longer than the slow-query alert threshold.
    pub fn track_performance_issue(
        &self,
        operation: &str,
        execution_time: f64,
        ctx: ErrorContext,
    ) -> Option<String> {
        let threshold = self.alerts.config().slow_query_alert_threshold_seconds;
        if execution_time <= threshold {
            return None;
        }
        let message = format!("{operation} took {execution_time:.3}s (threshold: {threshold}s)");
        Some(self.track_error(SLOW_QUERY, &message, ctx.execution_time(execution_time)))
    }

    pub fn track_connection_issue(&self, issue: ConnectionIssue, details: &str, ctx: ErrorContext) -> String {
        self.track_error(issue.error_type(), details, ctx)
    }

    /// Failures over operations in the window. The denominator is at least the failure
    /// count, so the rate never exceeds 1.0.
    pub fn error_rate(&self, window_minutes: u64) -> f64 {
        let cutoff = window_cutoff(window_minutes);
        let failures = self
            .state
            .read()
            .history
            .iter()
            .rev()
            .take_while(|e| e.timestamp >= cutoff)
            .filter(|e| e.error_type != SLOW_QUERY)
            .count();
        if failures == 0 {
            return 0.0;
        }
        let operations = self.operations.operations_since(cutoff).max(failures);
        failures as f64 / operations as f64
    }

    pub fn error_rates(&self) -> Vec<WindowErrorRate> {
        self.alerts
            .config()
            .error_rate_thresholds
            .iter()
            .map(|t| WindowErrorRate {
                window_minutes: t.window_minutes,
                error_rate: self.error_rate(t.window_minutes),
                threshold: t.threshold,
            })
            .collect()
    }

    /// Resolve error-rate alerts whose window has dropped back under its threshold.
    pub fn evaluate_recovery(&self) -> usize {
        let rates = self.error_rates();
        self.alerts.resolve_where(
            |alert: &Alert| {
                if alert.alert_type != AlertType::HighErrorRate {
                    return false;
                }
                let window = alert.metadata.get("window_minutes").and_then(Value::as_u64);
                rates
                    .iter()
                    .find(|r| Some(r.window_minutes) == window)
                    .is_some_and(|r| r.error_rate <= r.threshold)
            },
            "error rate back under threshold",
        )
    }

    pub fn error_summary(&self, time_window_minutes: u64) -> Windowed<ErrorSummary> {
        let cutoff = window_cutoff(time_window_minutes);
        let recent: Vec<ErrorRecord> = {
            let state = self.state.read();
            let mut recent: Vec<ErrorRecord> = state
                .history
                .iter()
                .rev()
                .take_while(|e| e.timestamp >= cutoff)
                .cloned()
                .collect();
            recent.reverse();
            recent
        };

        if recent.is_empty() {
            return Windowed::NoData(NoData {
                message: "No errors in time window".to_string(),
                time_window_minutes: Some(time_window_minutes),
            });
        }

        let mut grouped: BTreeMap<String, Vec<&ErrorRecord>> = BTreeMap::new();
        for record in &recent {
            grouped.entry(record.error_type.clone()).or_default().push(record);
        }

        let error_patterns: BTreeMap<String, ErrorPattern> = grouped
            .into_iter()
            .map(|(error_type, errors)| {
                let timed: Vec<f64> = errors.iter().filter_map(|e| e.execution_time).collect();
                let tables: BTreeSet<String> =
                    errors.iter().filter_map(|e| e.table_name.clone()).collect();
                let mut messages: HashMap<&str, usize> = HashMap::new();
                for e in &errors {
                    *messages.entry(e.error_message.as_str()).or_insert(0) += 1;
                }
                let most_common_message = messages
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
                    .map(|(m, _)| m.to_string())
                    .unwrap_or_default();
                let pattern = ErrorPattern {
                    count: errors.len(),
                    first_occurrence: errors[0].timestamp,
                    last_occurrence: errors[errors.len() - 1].timestamp,
                    avg_execution_time: (!timed.is_empty())
                        .then(|| timed.iter().sum::<f64>() / timed.len() as f64),
                    affected_tables: tables.into_iter().collect(),
                    most_common_message,
                };
                (error_type, pattern)
            })
            .collect();

        let recent_start = recent.len().saturating_sub(10);
        let recent_errors = recent[recent_start..]
            .iter()
            .map(|e| ErrorRecord {
                error_message: e.error_message.chars().take(200).collect(),
                ..e.clone()
            })
            .collect();

        Windowed::Data(ErrorSummary {
            time_window_minutes,
            total_errors: recent.len(),
            unique_error_types: error_patterns.len(),
            errors_per_minute: recent.len() as f64 / time_window_minutes.max(1) as f64,
            error_rate: self.error_rate(time_window_minutes),
            error_patterns,
            active_alerts: self.alerts.active_count(),
            recent_errors,
        })
    }

    pub fn recent_errors(&self, limit: usize) -> Vec<ErrorRecord> {
        let state = self.state.read();
        let start = state.history.len().saturating_sub(limit);
        state.history.iter().skip(start).cloned().collect()
    }

    pub fn counts_by_type(&self) -> HashMap<String, u64> {
        self.state.read().counts_by_type.clone()
    }

    pub fn total_tracked(&self) -> u64 {
        self.state.read().counts_by_type.values().sum()
    }

    /// Clear error records and every alert, cooldown included.
    pub fn reset_error_tracking(&self) {
        *self.state.write() = ErrorState::new();
        self.alerts.reset();
        info!("Error tracking data has been reset");
    }
}

fn error_rate_alert(rate: WindowErrorRate) -> AlertCandidate {
    let severity = if rate.error_rate > 0.1 {
        AlertSeverity::High
    } else {
        AlertSeverity::Medium
    };
    AlertCandidate::new(
        AlertType::HighErrorRate,
        severity,
        format!("High Error Rate Detected ({} min window)", rate.window_minutes),
        format!(
            "Database error rate is {:.2}% over the last {} minutes, exceeding threshold of {:.2}%",
            rate.error_rate * 100.0,
            rate.window_minutes,
            rate.threshold * 100.0
        ),
    )
    .with_cooldown_key(format!("high_error_rate_{}min", rate.window_minutes))
    .with_metadata("window_minutes", rate.window_minutes)
    .with_metadata("error_rate", rate.error_rate)
    .with_metadata("threshold", rate.threshold)
}

/// Thresholds keyed by window length in minutes.
pub fn thresholds_by_window(thresholds: &[ErrorRateThreshold]) -> BTreeMap<u64, f64> {
    thresholds.iter().map(|t| (t.window_minutes, t.threshold)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::alerts::{AlertConfig, AlertCooldowns};
    use approx::assert_relative_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FixedOperations(AtomicUsize);

    impl OperationCounter for FixedOperations {
        fn operations_since(&self, _cutoff: DateTime<Utc>) -> usize {
            self.0.load(Ordering::SeqCst)
        }
    }

    fn tracker_with(config: AlertConfig, operations: usize) -> ErrorTracker {
        let counter = Arc::new(FixedOperations(AtomicUsize::new(operations)));
        ErrorTracker::new(Arc::new(AlertManager::new(config)), counter)
    }

    fn active_of(tracker: &ErrorTracker, alert_type: AlertType) -> Vec<Alert> {
        tracker
            .alerts()
            .active_alerts()
            .into_iter()
            .filter(|a| a.alert_type == alert_type)
            .collect()
    }

    #[test]
    fn test_error_rate_uses_operation_count() {
        let tracker = tracker_with(AlertConfig::default(), 100);
        for _ in 0..3 {
            tracker.track_error("UniqueViolation", "duplicate key", ErrorContext::new());
        }
        assert_relative_eq!(tracker.error_rate(5), 0.03);
    }

    #[test]
    fn test_error_rate_is_bounded_without_operations() {
        let tracker = tracker_with(AlertConfig::default(), 0);
        assert_eq!(tracker.error_rate(5), 0.0);
        tracker.track_error("ConnectionLost", "gone", ErrorContext::new());
        assert_relative_eq!(tracker.error_rate(5), 1.0);
    }

    #[test]
    fn test_oversized_windows_cover_all_errors() {
        let tracker = tracker_with(AlertConfig::default(), 10);
        tracker.track_error("ConnectionLost", "gone", ErrorContext::new());

        for window in [200_000_000_000, u64::MAX] {
            assert_relative_eq!(tracker.error_rate(window), 0.1);
            let summary = tracker.error_summary(window);
            assert_eq!(summary.data().unwrap().total_errors, 1);
        }
    }

    #[test]
    fn test_slow_queries_do_not_count_as_failures() {
        let tracker = tracker_with(AlertConfig::default(), 10);
        tracker.track_performance_issue("SELECT", 3.0, ErrorContext::new());
        assert_eq!(tracker.error_rate(60), 0.0);
        assert!(tracker
            .track_performance_issue("SELECT", 0.5, ErrorContext::new())
            .is_none());
        assert_eq!(active_of(&tracker, AlertType::SlowQuery).len(), 1);
    }

    #[test]
    fn test_high_error_rate_severity() {
        let tracker = tracker_with(AlertConfig::default(), 100);
        // 3% breaches only the 60 minute window (2%).
        for _ in 0..3 {
            tracker.track_error("DataError", "bad input", ErrorContext::new());
        }
        let alerts = active_of(&tracker, AlertType::HighErrorRate);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Medium);
        assert_eq!(alerts[0].metadata["window_minutes"], 60);

        let tracker = tracker_with(AlertConfig::default(), 5);
        tracker.track_error("DataError", "bad input", ErrorContext::new());
        let alerts = active_of(&tracker, AlertType::HighErrorRate);
        // 20% breaches all three windows, each with its own cooldown key.
        assert_eq!(alerts.len(), 3);
        assert!(alerts.iter().all(|a| a.severity == AlertSeverity::High));
    }

    #[test]
    fn test_type_specific_rules() {
        let tracker = tracker_with(
            AlertConfig {
                error_rate_thresholds: vec![],
                ..AlertConfig::default()
            },
            1000,
        );
        tracker.track_error("ConnectionFailure", "refused", ErrorContext::new().connection_id(4));
        tracker.track_error("PoolExhausted", "limit reached", ErrorContext::new());
        tracker.track_error("TransactionTimeout", "probe timed out", ErrorContext::new());
        tracker.track_error("DatabaseError", "deadlock detected", ErrorContext::new());

        let failure = active_of(&tracker, AlertType::ConnectionFailure);
        assert_eq!(failure[0].severity, AlertSeverity::Critical);
        assert_eq!(failure[0].metadata["connection_id"], 4);
        assert_eq!(active_of(&tracker, AlertType::PoolExhaustion).len(), 1);
        assert_eq!(active_of(&tracker, AlertType::TransactionTimeout).len(), 1);
        assert_eq!(active_of(&tracker, AlertType::Deadlock)[0].severity, AlertSeverity::High);
    }

    #[test]
    fn test_consecutive_failures_trigger_degradation() {
        let tracker = tracker_with(
            AlertConfig {
                error_rate_thresholds: vec![],
                ..AlertConfig::default()
            },
            1000,
        );
        for i in 0..4 {
            tracker.track_error("ConnectionLost", "gone", ErrorContext::new());
            tracker.track_error("DataError", &format!("bad {i}"), ErrorContext::new());
        }
        assert!(active_of(&tracker, AlertType::PerformanceDegradation).is_empty());

        tracker.track_error("ConnectionLost", "gone", ErrorContext::new());
        let alerts = active_of(&tracker, AlertType::PerformanceDegradation);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].metadata["error_type"], "ConnectionLost");
        assert_eq!(alerts[0].metadata["failure_count"], 5);
    }

    #[test]
    fn test_cooldown_suppresses_alert_but_records_error() {
        let tracker = tracker_with(AlertConfig::default(), 1000);
        tracker.track_error("ConnectionFailure", "refused", ErrorContext::new());
        tracker.track_error("ConnectionFailure", "refused", ErrorContext::new());
        assert_eq!(active_of(&tracker, AlertType::ConnectionFailure).len(), 1);
        assert_eq!(tracker.counts_by_type()["ConnectionFailure"], 2);
        assert_eq!(tracker.recent_errors(10).len(), 2);
    }

    #[test]
    fn test_recovery_resolves_error_rate_alerts() {
        let counter = Arc::new(FixedOperations(AtomicUsize::new(10)));
        let alerts = Arc::new(AlertManager::new(AlertConfig {
            cooldowns: AlertCooldowns::disabled(),
            ..AlertConfig::default()
        }));
        let tracker = ErrorTracker::new(alerts, counter.clone());
        tracker.track_error("DataError", "bad", ErrorContext::new());
        assert!(!active_of(&tracker, AlertType::HighErrorRate).is_empty());

        counter.0.store(1000, Ordering::SeqCst);
        assert!(tracker.evaluate_recovery() >= 1);
        assert!(active_of(&tracker, AlertType::HighErrorRate).is_empty());
    }

    #[test]
    fn test_error_summary() {
        let tracker = tracker_with(AlertConfig::default(), 1000);
        assert!(tracker.error_summary(60).is_empty());

        tracker.track_error(
            "UniqueViolation",
            "duplicate key",
            ErrorContext::new()
                .query_type(QueryType::Insert)
                .table_name(Some("users".to_string()))
                .execution_time(0.2),
        );
        tracker.track_error("UniqueViolation", "duplicate key", ErrorContext::new());
        tracker.track_connection_issue(ConnectionIssue::Timeout, "slow handshake", ErrorContext::new());

        let summary = tracker.error_summary(60);
        let summary = summary.data().unwrap();
        assert_eq!(summary.total_errors, 3);
        assert_eq!(summary.unique_error_types, 2);
        let pattern = &summary.error_patterns["UniqueViolation"];
        assert_eq!(pattern.count, 2);
        assert_eq!(pattern.affected_tables, vec!["users".to_string()]);
        assert_relative_eq!(pattern.avg_execution_time.unwrap(), 0.2);
        assert!(summary.error_patterns.contains_key("ConnectionTimeout"));
    }

    #[test]
    fn test_reset_error_tracking() {
        let tracker = tracker_with(AlertConfig::default(), 0);
        tracker.track_error("ConnectionFailure", "refused", ErrorContext::new());
        tracker.reset_error_tracking();
        assert_eq!(tracker.total_tracked(), 0);
        assert_eq!(tracker.alerts().active_count(), 0);
        // Cooldowns were cleared too.
        tracker.track_error("ConnectionFailure", "refused", ErrorContext::new());
        assert_eq!(active_of(&tracker, AlertType::ConnectionFailure).len(), 1);
    }
}
