pub mod api;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod monitoring;
pub mod resilience;

pub use config::Config;
pub use context::ObservabilityContext;
pub use error::{DatabaseError, Result};

// Re-export pool and driver types
pub use db::{
    DatabaseManager, DetailedPoolInfo, Driver, DriverConnection, DriverError, DriverErrorKind,
    ManagerCell, MonitoredSession, PgDriver, PoolMetrics, PoolMetricsSnapshot, QueryType,
};

// Re-export monitoring types
pub use monitoring::{
    Alert, AlertManager, AlertSeverity, AlertType, DatabaseMonitor, ErrorTracker,
    HealthCheckResult, HealthStatus, MetricsCollector, PrometheusExporter,
};

// Re-export resilience types
pub use resilience::{classify, Classification, Classify, ErrorCategory, RetryConfig, RetryExecutor};
