//! Rolling-window store of query, connection and pool-utilization records.
//!
//! All buffers live behind one lock so a reset swaps the whole state at once. Record
//! timestamps never go backwards, which lets windowed queries scan from the newest end and
//! stop at the first record outside the window.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use tracing::{debug, info, warn};

use super::errors::OperationCounter;
use crate::db::pool::{PoolEvent, PoolEventListener};
use crate::db::statement::{self, QueryType};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub slow_query_threshold_seconds: f64,
    pub max_query_history: usize,
    pub max_slow_queries: usize,
    pub max_query_errors: usize,
    pub max_connection_history: usize,
    pub max_pool_samples: usize,
    pub high_utilization_threshold: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            slow_query_threshold_seconds: 1.0,
            max_query_history: 1000,
            max_slow_queries: 100,
            max_query_errors: 500,
            max_connection_history: 100,
            // 24 hours at one sample per 5 minutes
            max_pool_samples: 288,
            high_utilization_threshold: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryRecord {
    pub query_hash: String,
    pub query_type: QueryType,
    /// Seconds.
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    pub rows_affected: Option<u64>,
    pub table_name: Option<String>,
}

/// A finished statement, before it is stamped and stored.
#[derive(Debug, Clone)]
pub struct QueryExecution {
    pub query_hash: String,
    pub query_type: QueryType,
    pub execution_time: f64,
    pub success: bool,
    pub error_message: Option<String>,
    pub rows_affected: Option<u64>,
    pub table_name: Option<String>,
}

impl QueryExecution {
    pub fn new(query_hash: impl Into<String>, query_type: QueryType, execution_time: f64) -> Self {
        Self {
            query_hash: query_hash.into(),
            query_type,
            execution_time,
            success: true,
            error_message: None,
            rows_affected: None,
            table_name: None,
        }
    }

    /// Derive hash, type and table from the statement text.
    pub fn from_sql(sql: &str, execution_time: f64) -> Self {
        let query_type = QueryType::from_sql(sql);
        let mut execution = Self::new(statement::query_hash(sql), query_type, execution_time);
        execution.table_name = statement::table_name(sql, query_type);
        execution
    }

    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.error_message = Some(message.into());
        self
    }

    pub fn rows_affected(mut self, rows: u64) -> Self {
        self.rows_affected = Some(rows);
        self
    }

    pub fn table(mut self, table_name: impl Into<String>) -> Self {
        self.table_name = Some(table_name.into());
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub query_type: QueryType,
    pub error_message: String,
    pub execution_time: f64,
    pub table_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConnectionRecord {
    pub connection_id: u64,
    pub created_at: DateTime<Utc>,
    pub last_used: DateTime<Utc>,
    pub total_queries: u64,
    pub total_execution_time: f64,
    pub errors: u64,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConnectionEvent {
    Created,
    Used { execution_time: f64, error: bool },
    Closed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct UtilizationSample {
    pub timestamp: DateTime<Utc>,
    pub utilization: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
    InsufficientData,
}

/// Result of a windowed query; empty windows are reported explicitly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Windowed<T> {
    Data(T),
    NoData(NoData),
}

impl<T> Windowed<T> {
    pub fn data(&self) -> Option<&T> {
        match self {
            Windowed::Data(data) => Some(data),
            Windowed::NoData(_) => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Windowed::NoData(_))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NoData {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_window_minutes: Option<u64>,
}

impl NoData {
    fn new(message: &str, time_window_minutes: Option<u64>) -> Self {
        Self {
            message: message.to_string(),
            time_window_minutes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryTypeStats {
    pub count: usize,
    pub avg_execution_time: f64,
    pub median_execution_time: f64,
    pub max_execution_time: f64,
    pub min_execution_time: f64,
    pub success_rate: f64,
    pub total_execution_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryPerformanceStats {
    pub time_window_minutes: u64,
    pub total_queries: usize,
    pub successful_queries: usize,
    pub error_rate: f64,
    pub avg_execution_time: f64,
    pub median_execution_time: f64,
    #[serde(rename = "95th_percentile")]
    pub p95_execution_time: f64,
    pub queries_per_minute: f64,
    pub stats_by_type: BTreeMap<QueryType, QueryTypeStats>,
    pub slow_queries_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolTrends {
    pub time_window_minutes: u64,
    pub data_points: usize,
    pub avg_utilization: f64,
    pub max_utilization: f64,
    pub min_utilization: f64,
    pub current_utilization: f64,
    pub utilization_trend: Trend,
    pub high_utilization_periods: usize,
    pub utilization_history: Vec<UtilizationSample>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryErrorGroup {
    pub count: usize,
    pub avg_execution_time: f64,
    pub most_common_error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessageCount {
    pub message: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryErrorAnalysis {
    pub time_window_minutes: u64,
    pub total_errors: usize,
    pub errors_per_minute: f64,
    pub errors_by_type: BTreeMap<QueryType, QueryErrorGroup>,
    pub most_common_errors: Vec<MessageCount>,
    pub recent_errors: Vec<QueryErrorRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowestQuery {
    pub execution_time: f64,
    pub query_type: QueryType,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQueryTypeStats {
    pub count: usize,
    pub avg_execution_time: f64,
    pub max_execution_time: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQuerySummary {
    pub query_type: QueryType,
    pub execution_time: f64,
    pub timestamp: DateTime<Utc>,
    pub table_name: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlowQueryAnalysis {
    pub total_slow_queries: usize,
    pub slow_query_threshold: f64,
    pub slowest_query: SlowestQuery,
    pub by_type: BTreeMap<QueryType, SlowQueryTypeStats>,
    pub recent_slow_queries: Vec<SlowQuerySummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CollectionStatus {
    pub query_history_size: usize,
    pub error_history_size: usize,
    pub pool_utilization_data_points: usize,
    pub last_reset: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComprehensiveMetrics {
    pub query_performance: Windowed<QueryPerformanceStats>,
    pub pool_trends: Windowed<PoolTrends>,
    pub error_analysis: Windowed<QueryErrorAnalysis>,
    pub slow_query_analysis: Windowed<SlowQueryAnalysis>,
    pub active_connections: usize,
    pub total_connection_history: usize,
    pub metrics_collection_status: CollectionStatus,
}

struct MetricsState {
    queries: VecDeque<QueryRecord>,
    slow_queries: VecDeque<QueryRecord>,
    query_errors: VecDeque<QueryErrorRecord>,
    error_counts_by_type: HashMap<QueryType, u64>,
    active_connections: HashMap<u64, ConnectionRecord>,
    connection_history: VecDeque<ConnectionRecord>,
    pool_samples: VecDeque<UtilizationSample>,
    last_timestamp: DateTime<Utc>,
    last_reset: DateTime<Utc>,
}

impl MetricsState {
    fn new() -> Self {
        let now = Utc::now();
        Self {
            queries: VecDeque::new(),
            slow_queries: VecDeque::new(),
            query_errors: VecDeque::new(),
            error_counts_by_type: HashMap::new(),
            active_connections: HashMap::new(),
            connection_history: VecDeque::new(),
            pool_samples: VecDeque::new(),
            last_timestamp: now,
            last_reset: now,
        }
    }

    /// Current time, clamped so it never precedes the previous record.
    fn stamp(&mut self) -> DateTime<Utc> {
        let now = Utc::now().max(self.last_timestamp);
        self.last_timestamp = now;
        now
    }
}

fn push_bounded<T>(buffer: &mut VecDeque<T>, item: T, capacity: usize) {
    if capacity == 0 {
        return;
    }
    while buffer.len() >= capacity {
        buffer.pop_front();
    }
    buffer.push_back(item);
}

/// Items at or after `cutoff`, oldest first.
fn in_window<T>(
    buffer: &VecDeque<T>,
    cutoff: DateTime<Utc>,
    timestamp: impl Fn(&T) -> DateTime<Utc>,
) -> Vec<&T> {
    let mut items: Vec<&T> = buffer
        .iter()
        .rev()
        .take_while(|item| timestamp(item) >= cutoff)
        .collect();
    items.reverse();
    items
}

/// Start of a window ending now. Windows reaching past the representable range start at
/// the earliest representable instant.
pub(crate) fn window_cutoff(time_window_minutes: u64) -> DateTime<Utc> {
    i64::try_from(time_window_minutes)
        .ok()
        .and_then(ChronoDuration::try_minutes)
        .and_then(|window| Utc::now().checked_sub_signed(window))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

fn median(values: &[f64]) -> f64 {
    let sorted = sorted(values);
    let n = sorted.len();
    match n {
        0 => 0.0,
        _ if n % 2 == 1 => sorted[n / 2],
        _ => (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0,
    }
}

fn max_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
}

fn min_of(values: &[f64]) -> f64 {
    values.iter().copied().fold(f64::INFINITY, f64::min)
}

/// 95th percentile: the 19th of 20 exclusive quantile cut points when there are at
/// least 20 values, otherwise the maximum.
pub fn percentile_95(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.len() < 20 {
        return max_of(values);
    }
    let data = sorted(values);
    let m = data.len();
    let (n, i) = (20usize, 19usize);
    let j = i * (m + 1) / n;
    let delta = (i * (m + 1) - j * n) as f64;
    (data[j - 1] * (n as f64 - delta) + data[j] * delta) / n as f64
}

/// Direction of a series by least-squares slope against sample index.
pub fn calculate_trend(data: &[f64]) -> Trend {
    if data.len() < 2 {
        return Trend::InsufficientData;
    }
    let n = data.len() as f64;
    let sum_x: f64 = (0..data.len()).map(|x| x as f64).sum();
    let sum_y: f64 = data.iter().sum();
    let sum_xy: f64 = data.iter().enumerate().map(|(x, y)| x as f64 * y).sum();
    let sum_x2: f64 = (0..data.len()).map(|x| (x as f64).powi(2)).sum();

    let slope = (n * sum_xy - sum_x * sum_y) / (n * sum_x2 - sum_x.powi(2));
    if slope > 0.01 {
        Trend::Increasing
    } else if slope < -0.01 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn truncate(message: &str, max_chars: usize) -> String {
    message.chars().take(max_chars).collect()
}

pub struct MetricsCollector {
    config: MetricsConfig,
    state: RwLock<MetricsState>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCollector {
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            state: RwLock::new(MetricsState::new()),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    pub fn slow_query_threshold(&self) -> f64 {
        self.config.slow_query_threshold_seconds
    }

    pub fn is_slow(&self, execution_time: f64) -> bool {
        execution_time > self.config.slow_query_threshold_seconds
    }

    pub fn record_query(&self, execution: QueryExecution) -> QueryRecord {
        let slow = self.is_slow(execution.execution_time);
        let mut state = self.state.write();
        let timestamp = state.stamp();

        let record = QueryRecord {
            query_hash: execution.query_hash,
            query_type: execution.query_type,
            execution_time: execution.execution_time,
            timestamp,
            success: execution.success,
            error_message: execution.error_message,
            rows_affected: execution.rows_affected,
            table_name: execution.table_name,
        };

        push_bounded(&mut state.queries, record.clone(), self.config.max_query_history);

        if slow {
            push_bounded(&mut state.slow_queries, record.clone(), self.config.max_slow_queries);
        }

        if let (false, Some(message)) = (record.success, record.error_message.as_ref()) {
            let error = QueryErrorRecord {
                timestamp,
                query_type: record.query_type,
                error_message: message.clone(),
                execution_time: record.execution_time,
                table_name: record.table_name.clone(),
            };
            push_bounded(&mut state.query_errors, error, self.config.max_query_errors);
            *state.error_counts_by_type.entry(record.query_type).or_insert(0) += 1;
        }
        drop(state);

        if slow {
            warn!(
                "Slow query detected: {} took {:.3}s",
                record.query_type, record.execution_time
            );
        }
        record
    }

    pub fn record_connection_event(&self, connection_id: u64, event: ConnectionEvent) {
        let mut state = self.state.write();
        let timestamp = state.stamp();
        match event {
            ConnectionEvent::Created => {
                state.active_connections.insert(
                    connection_id,
                    ConnectionRecord {
                        connection_id,
                        created_at: timestamp,
                        last_used: timestamp,
                        total_queries: 0,
                        total_execution_time: 0.0,
                        errors: 0,
                        is_active: true,
                    },
                );
            }
            ConnectionEvent::Used {
                execution_time,
                error,
            } => {
                if let Some(conn) = state.active_connections.get_mut(&connection_id) {
                    conn.last_used = timestamp;
                    conn.total_queries += 1;
                    conn.total_execution_time += execution_time;
                    if error {
                        conn.errors += 1;
                    }
                } else {
                    debug!("Usage of untracked connection {} dropped", connection_id);
                }
            }
            ConnectionEvent::Closed => {
                if let Some(mut conn) = state.active_connections.remove(&connection_id) {
                    conn.is_active = false;
                    let capacity = self.config.max_connection_history;
                    push_bounded(&mut state.connection_history, conn, capacity);
                } else {
                    debug!("Close of untracked connection {} dropped", connection_id);
                }
            }
        }
    }

    /// Sample pool utilization as `checked_out / (pool_size + overflow)`.
    pub fn record_pool_utilization(&self, pool_size: usize, checked_out: usize, overflow: usize) -> f64 {
        let capacity = pool_size + overflow;
        let utilization = if capacity > 0 {
            checked_out as f64 / capacity as f64
        } else {
            0.0
        };

        {
            let mut state = self.state.write();
            let timestamp = state.stamp();
            push_bounded(
                &mut state.pool_samples,
                UtilizationSample {
                    timestamp,
                    utilization,
                },
                self.config.max_pool_samples,
            );
        }

        if utilization > self.config.high_utilization_threshold {
            warn!(
                "High pool utilization: {:.1}% ({}/{})",
                utilization * 100.0,
                checked_out,
                capacity
            );
        }
        utilization
    }

    pub fn query_performance_stats(&self, time_window_minutes: u64) -> Windowed<QueryPerformanceStats> {
        let cutoff = window_cutoff(time_window_minutes);
        let state = self.state.read();
        let recent = in_window(&state.queries, cutoff, |q| q.timestamp);

        if recent.is_empty() {
            return Windowed::NoData(NoData::new(
                "No queries in time window",
                Some(time_window_minutes),
            ));
        }

        let mut by_type: BTreeMap<QueryType, Vec<&QueryRecord>> = BTreeMap::new();
        for query in &recent {
            by_type.entry(query.query_type).or_default().push(query);
        }

        let stats_by_type = by_type
            .into_iter()
            .map(|(query_type, queries)| {
                let times: Vec<f64> = queries.iter().map(|q| q.execution_time).collect();
                let successes = queries.iter().filter(|q| q.success).count();
                let stats = QueryTypeStats {
                    count: queries.len(),
                    avg_execution_time: mean(&times),
                    median_execution_time: median(&times),
                    max_execution_time: max_of(&times),
                    min_execution_time: min_of(&times),
                    success_rate: successes as f64 / queries.len() as f64,
                    total_execution_time: times.iter().sum(),
                };
                (query_type, stats)
            })
            .collect();

        let times: Vec<f64> = recent.iter().map(|q| q.execution_time).collect();
        let total = recent.len();
        let successful = recent.iter().filter(|q| q.success).count();

        Windowed::Data(QueryPerformanceStats {
            time_window_minutes,
            total_queries: total,
            successful_queries: successful,
            error_rate: (total - successful) as f64 / total as f64,
            avg_execution_time: mean(&times),
            median_execution_time: median(&times),
            p95_execution_time: percentile_95(&times),
            queries_per_minute: total as f64 / time_window_minutes.max(1) as f64,
            stats_by_type,
            slow_queries_count: times.iter().filter(|t| self.is_slow(**t)).count(),
        })
    }

    pub fn connection_pool_trends(&self, time_window_minutes: u64) -> Windowed<PoolTrends> {
        let cutoff = window_cutoff(time_window_minutes);
        let state = self.state.read();
        let recent = in_window(&state.pool_samples, cutoff, |s| s.timestamp);

        if recent.is_empty() {
            return Windowed::NoData(NoData::new(
                "No pool utilization data in time window",
                Some(time_window_minutes),
            ));
        }

        let values: Vec<f64> = recent.iter().map(|s| s.utilization).collect();
        let history_start = recent.len().saturating_sub(20);

        Windowed::Data(PoolTrends {
            time_window_minutes,
            data_points: values.len(),
            avg_utilization: mean(&values),
            max_utilization: max_of(&values),
            min_utilization: min_of(&values),
            current_utilization: values.last().copied().unwrap_or(0.0),
            utilization_trend: calculate_trend(&values),
            high_utilization_periods: values
                .iter()
                .filter(|u| **u > self.config.high_utilization_threshold)
                .count(),
            utilization_history: recent[history_start..].iter().map(|s| **s).collect(),
        })
    }

    pub fn error_analysis(&self, time_window_minutes: u64) -> Windowed<QueryErrorAnalysis> {
        let cutoff = window_cutoff(time_window_minutes);
        let state = self.state.read();
        let recent = in_window(&state.query_errors, cutoff, |e| e.timestamp);

        if recent.is_empty() {
            return Windowed::NoData(NoData::new(
                "No errors in time window",
                Some(time_window_minutes),
            ));
        }

        let mut by_type: BTreeMap<QueryType, Vec<&QueryErrorRecord>> = BTreeMap::new();
        let mut by_message: HashMap<&str, usize> = HashMap::new();
        for error in &recent {
            by_type.entry(error.query_type).or_default().push(error);
            *by_message.entry(error.error_message.as_str()).or_insert(0) += 1;
        }

        let errors_by_type = by_type
            .into_iter()
            .map(|(query_type, errors)| {
                let times: Vec<f64> = errors.iter().map(|e| e.execution_time).collect();
                let mut counts: HashMap<&str, usize> = HashMap::new();
                for e in &errors {
                    *counts.entry(e.error_message.as_str()).or_insert(0) += 1;
                }
                let most_common_error = counts
                    .into_iter()
                    .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
                    .map(|(message, _)| message.to_string())
                    .unwrap_or_default();
                let group = QueryErrorGroup {
                    count: errors.len(),
                    avg_execution_time: mean(&times),
                    most_common_error,
                };
                (query_type, group)
            })
            .collect();

        let mut most_common_errors: Vec<MessageCount> = by_message
            .into_iter()
            .map(|(message, count)| MessageCount {
                message: message.to_string(),
                count,
            })
            .collect();
        most_common_errors.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.message.cmp(&b.message)));
        most_common_errors.truncate(10);

        let recent_start = recent.len().saturating_sub(10);
        let recent_errors = recent[recent_start..]
            .iter()
            .map(|e| QueryErrorRecord {
                error_message: truncate(&e.error_message, 200),
                ..(*e).clone()
            })
            .collect();

        Windowed::Data(QueryErrorAnalysis {
            time_window_minutes,
            total_errors: recent.len(),
            errors_per_minute: recent.len() as f64 / time_window_minutes.max(1) as f64,
            errors_by_type,
            most_common_errors,
            recent_errors,
        })
    }

    pub fn slow_query_analysis(&self) -> Windowed<SlowQueryAnalysis> {
        let state = self.state.read();
        let slowest = state
            .slow_queries
            .iter()
            .max_by(|a, b| a.execution_time.total_cmp(&b.execution_time));
        let Some(slowest) = slowest else {
            return Windowed::NoData(NoData::new("No slow queries recorded", None));
        };

        let mut by_type: BTreeMap<QueryType, Vec<f64>> = BTreeMap::new();
        for query in &state.slow_queries {
            by_type.entry(query.query_type).or_default().push(query.execution_time);
        }

        let recent_start = state.slow_queries.len().saturating_sub(10);
        Windowed::Data(SlowQueryAnalysis {
            total_slow_queries: state.slow_queries.len(),
            slow_query_threshold: self.config.slow_query_threshold_seconds,
            slowest_query: SlowestQuery {
                execution_time: slowest.execution_time,
                query_type: slowest.query_type,
                timestamp: slowest.timestamp,
            },
            by_type: by_type
                .into_iter()
                .map(|(query_type, times)| {
                    let stats = SlowQueryTypeStats {
                        count: times.len(),
                        avg_execution_time: mean(&times),
                        max_execution_time: max_of(&times),
                    };
                    (query_type, stats)
                })
                .collect(),
            recent_slow_queries: state
                .slow_queries
                .iter()
                .skip(recent_start)
                .map(|q| SlowQuerySummary {
                    query_type: q.query_type,
                    execution_time: q.execution_time,
                    timestamp: q.timestamp,
                    table_name: q.table_name.clone(),
                    success: q.success,
                })
                .collect(),
        })
    }

    pub fn comprehensive_metrics(&self) -> ComprehensiveMetrics {
        let query_performance = self.query_performance_stats(60);
        let pool_trends = self.connection_pool_trends(60);
        let error_analysis = self.error_analysis(60);
        let slow_query_analysis = self.slow_query_analysis();

        let state = self.state.read();
        ComprehensiveMetrics {
            query_performance,
            pool_trends,
            error_analysis,
            slow_query_analysis,
            active_connections: state.active_connections.len(),
            total_connection_history: state.connection_history.len(),
            metrics_collection_status: CollectionStatus {
                query_history_size: state.queries.len(),
                error_history_size: state.query_errors.len(),
                pool_utilization_data_points: state.pool_samples.len(),
                last_reset: state.last_reset,
            },
        }
    }

    pub fn active_connections(&self) -> Vec<ConnectionRecord> {
        let mut connections: Vec<_> = self.state.read().active_connections.values().cloned().collect();
        connections.sort_by_key(|c| c.connection_id);
        connections
    }

    pub fn connection_history(&self) -> Vec<ConnectionRecord> {
        self.state.read().connection_history.iter().cloned().collect()
    }

    pub fn recent_queries(&self, limit: usize) -> Vec<QueryRecord> {
        let state = self.state.read();
        let start = state.queries.len().saturating_sub(limit);
        state.queries.iter().skip(start).cloned().collect()
    }

    pub fn error_counts_by_type(&self) -> HashMap<QueryType, u64> {
        self.state.read().error_counts_by_type.clone()
    }

    /// Number of queries recorded at or after `cutoff`.
    pub fn operations_since(&self, cutoff: DateTime<Utc>) -> usize {
        self.state
            .read()
            .queries
            .iter()
            .rev()
            .take_while(|q| q.timestamp >= cutoff)
            .count()
    }

    pub fn reset_metrics(&self) {
        *self.state.write() = MetricsState::new();
        info!("All database metrics have been reset");
    }
}

impl OperationCounter for MetricsCollector {
    fn operations_since(&self, cutoff: DateTime<Utc>) -> usize {
        MetricsCollector::operations_since(self, cutoff)
    }
}

impl PoolEventListener for MetricsCollector {
    fn on_event(&self, event: &PoolEvent) {
        match event {
            PoolEvent::Connect { id, .. } => self.record_connection_event(*id, ConnectionEvent::Created),
            PoolEvent::Close { id } => self.record_connection_event(*id, ConnectionEvent::Closed),
            _ => {}
        }
    }
}
