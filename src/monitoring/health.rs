use chrono::{DateTime, Utc};
use serde::Serialize;

use super::HealthStatus;
use crate::db::manager::DetailedPoolInfo;
use crate::db::pool_metrics::PoolMetricsSnapshot;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthChecks {
    pub basic_connection: bool,
    pub pool_status: bool,
    pub query_execution: bool,
    pub transaction_test: bool,
}

impl HealthChecks {
    pub fn all_passed(&self) -> bool {
        self.basic_connection && self.pool_status && self.query_execution && self.transaction_test
    }

    pub fn passed(&self) -> usize {
        [
            self.basic_connection,
            self.pool_status,
            self.query_execution,
            self.transaction_test,
        ]
        .iter()
        .filter(|c| **c)
        .count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerInfo {
    pub server_time: Option<String>,
    pub db_version: Option<String>,
    pub db_name: Option<String>,
}

impl ServerInfo {
    /// Builds server info from the first row of the server-info probe.
    pub fn from_row(row: &[Option<String>]) -> Self {
        let column = |i: usize| row.get(i).cloned().flatten();
        Self {
            server_time: column(0),
            db_version: column(1),
            db_name: column(2),
        }
    }
}

/// Outcome of one health check with recovery.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub status: HealthStatus,
    pub checks: HealthChecks,
    pub recovery_actions: Vec<String>,
    pub pool_info: Option<DetailedPoolInfo>,
    pub metrics: Option<PoolMetricsSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_info: Option<ServerInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced_check_error: Option<String>,
    pub duration_ms: f64,
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Starting point of a check: every probe failed until shown otherwise.
    pub fn pending() -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            checks: HealthChecks::default(),
            recovery_actions: Vec::new(),
            pool_info: None,
            metrics: None,
            server_info: None,
            error: None,
            advanced_check_error: None,
            duration_ms: 0.0,
            timestamp: Utc::now(),
        }
    }

    /// Result recorded when the check itself could not run.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            error: Some(error.into()),
            ..Self::pending()
        }
    }

    /// Derive the overall status from the individual checks.
    pub fn determine_overall_status(&mut self) {
        self.status = if self.checks.all_passed() {
            HealthStatus::Healthy
        } else if self.checks.basic_connection {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        };
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
