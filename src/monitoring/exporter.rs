//! Prometheus text exposition of pool, query and alert state.

use prometheus::{Encoder, Gauge, GaugeVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder};

use super::AlertSeverity;
use crate::db::manager::DatabaseManager;
use crate::error::Result;

/// Gauges refreshed from the live collectors on every scrape.
pub struct PrometheusExporter {
    registry: Registry,

    // Pool counters
    connection_attempts: IntGauge,
    failed_connections: IntGauge,
    connection_timeouts: IntGauge,
    pool_exhausted: IntGauge,
    connection_success_rate: Gauge,
    average_connection_time_ms: Gauge,
    peak_connections: IntGauge,

    // Pool state
    checked_out: IntGauge,
    checked_in: IntGauge,
    pool_utilization: Gauge,

    // Queries, last hour
    queries_total: IntGauge,
    query_avg_seconds: Gauge,
    query_p95_seconds: Gauge,
    slow_queries: IntGauge,

    error_rate: GaugeVec,
    active_alerts: IntGaugeVec,
}

impl PrometheusExporter {
    pub fn new() -> Result<Self> {
        let registry = Registry::new_custom(Some("poolwatch".to_string()), None)?;

        let connection_attempts = IntGauge::new("connection_attempts", "Connection checkouts attempted")?;
        let failed_connections = IntGauge::new("connection_failures", "Failed connection attempts")?;
        let connection_timeouts = IntGauge::new("connection_timeouts", "Connection acquisition timeouts")?;
        let pool_exhausted = IntGauge::new("pool_exhausted", "Times the pool had no capacity left")?;
        let connection_success_rate =
            Gauge::new("connection_success_rate", "Percentage of successful connection attempts")?;
        let average_connection_time_ms =
            Gauge::new("connection_time_avg_ms", "Average connection acquisition time")?;
        let peak_connections = IntGauge::new("connections_peak", "Peak concurrent checkouts")?;

        let checked_out = IntGauge::new("pool_checked_out", "Connections currently checked out")?;
        let checked_in = IntGauge::new("pool_checked_in", "Idle connections held by the pool")?;
        let pool_utilization = Gauge::new("pool_utilization", "Checked-out fraction of pool capacity")?;

        let queries_total = IntGauge::new("queries_last_hour", "Statements recorded in the last hour")?;
        let query_avg_seconds = Gauge::new("query_duration_avg_seconds", "Mean statement time, last hour")?;
        let query_p95_seconds = Gauge::new("query_duration_p95_seconds", "95th percentile statement time, last hour")?;
        let slow_queries = IntGauge::new("slow_queries_last_hour", "Slow statements in the last hour")?;

        let error_rate = GaugeVec::new(
            Opts::new("error_rate", "Tracked error rate per window"),
            &["window_minutes"],
        )?;
        let active_alerts = IntGaugeVec::new(
            Opts::new("active_alerts", "Unresolved alerts by severity"),
            &["severity"],
        )?;

        registry.register(Box::new(connection_attempts.clone()))?;
        registry.register(Box::new(failed_connections.clone()))?;
        registry.register(Box::new(connection_timeouts.clone()))?;
        registry.register(Box::new(pool_exhausted.clone()))?;
        registry.register(Box::new(connection_success_rate.clone()))?;
        registry.register(Box::new(average_connection_time_ms.clone()))?;
        registry.register(Box::new(peak_connections.clone()))?;
        registry.register(Box::new(checked_out.clone()))?;
        registry.register(Box::new(checked_in.clone()))?;
        registry.register(Box::new(pool_utilization.clone()))?;
        registry.register(Box::new(queries_total.clone()))?;
        registry.register(Box::new(query_avg_seconds.clone()))?;
        registry.register(Box::new(query_p95_seconds.clone()))?;
        registry.register(Box::new(slow_queries.clone()))?;
        registry.register(Box::new(error_rate.clone()))?;
        registry.register(Box::new(active_alerts.clone()))?;

        Ok(Self {
            registry,
            connection_attempts,
            failed_connections,
            connection_timeouts,
            pool_exhausted,
            connection_success_rate,
            average_connection_time_ms,
            peak_connections,
            checked_out,
            checked_in,
            pool_utilization,
            queries_total,
            query_avg_seconds,
            query_p95_seconds,
            slow_queries,
            error_rate,
            active_alerts,
        })
    }

    fn refresh(&self, manager: &DatabaseManager) {
        let pool = manager.pool_metrics().snapshot();
        self.connection_attempts.set(pool.connection_attempts as i64);
        self.failed_connections.set(pool.failed_connections as i64);
        self.connection_timeouts.set(pool.connection_timeouts as i64);
        self.pool_exhausted.set(pool.pool_exhausted_count as i64);
        self.connection_success_rate.set(pool.success_rate);
        self.average_connection_time_ms.set(pool.average_connection_time_ms);
        self.peak_connections.set(pool.peak_connections as i64);

        if let Some(status) = manager.connection_info() {
            self.checked_out.set(status.checked_out as i64);
            self.checked_in.set(status.checked_in as i64);
            self.pool_utilization.set(status.utilization());
        }

        match manager.metrics().query_performance_stats(60).data() {
            Some(stats) => {
                self.queries_total.set(stats.total_queries as i64);
                self.query_avg_seconds.set(stats.avg_execution_time);
                self.query_p95_seconds.set(stats.p95_execution_time);
                self.slow_queries.set(stats.slow_queries_count as i64);
            }
            None => {
                self.queries_total.set(0);
                self.query_avg_seconds.set(0.0);
                self.query_p95_seconds.set(0.0);
                self.slow_queries.set(0);
            }
        }

        for rate in manager.errors().error_rates() {
            let window = rate.window_minutes.to_string();
            self.error_rate
                .with_label_values(&[window.as_str()])
                .set(rate.error_rate);
        }

        let by_severity = manager.errors().alerts().active_counts_by_severity();
        for severity in [
            AlertSeverity::Low,
            AlertSeverity::Medium,
            AlertSeverity::High,
            AlertSeverity::Critical,
        ] {
            let count = by_severity.get(&severity).copied().unwrap_or(0);
            self.active_alerts
                .with_label_values(&[severity.as_str()])
                .set(count as i64);
        }
    }

    /// Refresh every gauge and render the registry in text format.
    pub fn gather(&self, manager: &DatabaseManager) -> Result<String> {
        self.refresh(manager);

        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
