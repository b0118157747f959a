pub mod alerts;
pub mod errors;
pub mod exporter;
pub mod health;
pub mod metrics;
pub mod monitor;

pub use alerts::*;
pub use errors::*;
pub use exporter::PrometheusExporter;
pub use health::*;
pub use metrics::*;
pub use monitor::*;

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Error,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Error => "error",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Low => "low",
            AlertSeverity::Medium => "medium",
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    ConnectionFailure,
    PoolExhaustion,
    SlowQuery,
    HighErrorRate,
    TransactionTimeout,
    Deadlock,
    PerformanceDegradation,
}

impl AlertType {
    pub const ALL: [AlertType; 7] = [
        AlertType::ConnectionFailure,
        AlertType::PoolExhaustion,
        AlertType::SlowQuery,
        AlertType::HighErrorRate,
        AlertType::TransactionTimeout,
        AlertType::Deadlock,
        AlertType::PerformanceDegradation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::ConnectionFailure => "connection_failure",
            AlertType::PoolExhaustion => "pool_exhaustion",
            AlertType::SlowQuery => "slow_query",
            AlertType::HighErrorRate => "high_error_rate",
            AlertType::TransactionTimeout => "transaction_timeout",
            AlertType::Deadlock => "deadlock",
            AlertType::PerformanceDegradation => "performance_degradation",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_names() {
        assert_eq!(
            serde_json::to_value(AlertType::PerformanceDegradation).unwrap(),
            "performance_degradation"
        );
        assert_eq!(serde_json::to_value(AlertSeverity::Critical).unwrap(), "critical");
        assert_eq!(serde_json::to_value(HealthStatus::Degraded).unwrap(), "degraded");
        assert!(AlertSeverity::Critical > AlertSeverity::High);
    }
}
