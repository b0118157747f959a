use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::db::driver::{Driver, StatementResult};
use crate::db::manager::{DatabaseManager, ManagerCell};
use crate::db::pool_metrics::PoolMetrics;
use crate::error::{DatabaseError, Result};
use crate::monitoring::alerts::{AlertManager, LogNotifier};
use crate::monitoring::errors::ErrorTracker;
use crate::monitoring::exporter::PrometheusExporter;
use crate::monitoring::metrics::MetricsCollector;
use crate::monitoring::monitor::DatabaseMonitor;
use crate::resilience::RetryExecutor;

/// Everything the observability layer shares, built once at startup and passed around
/// by `Arc`.
pub struct ObservabilityContext {
    config: Config,
    pool_metrics: Arc<PoolMetrics>,
    metrics: Arc<MetricsCollector>,
    alerts: Arc<AlertManager>,
    errors: Arc<ErrorTracker>,
    retry: RetryExecutor,
    managers: Arc<ManagerCell>,
    monitor: Arc<DatabaseMonitor>,
    exporter: PrometheusExporter,
}

impl ObservabilityContext {
    /// The database manager itself is built lazily on first use.
    pub fn new(config: Config, driver: Arc<dyn Driver>) -> Result<Arc<Self>> {
        let pool_metrics = Arc::new(PoolMetrics::new());
        let metrics = Arc::new(MetricsCollector::new(config.metrics.clone()));
        let alerts = Arc::new(AlertManager::new(config.alerts.clone()));
        alerts.add_notification_handler(Arc::new(LogNotifier));
        let errors = Arc::new(ErrorTracker::new(alerts.clone(), metrics.clone()));

        let managers = {
            let pool_config = config.pool.clone();
            let probes = config.probes.clone();
            let pool_metrics = pool_metrics.clone();
            let metrics = metrics.clone();
            let errors = errors.clone();
            Arc::new(ManagerCell::new(move || {
                let manager: Result<Arc<DatabaseManager>> = Ok(Arc::new(DatabaseManager::new(
                    driver.clone(),
                    pool_config.clone(),
                    probes.clone(),
                    pool_metrics.clone(),
                    metrics.clone(),
                    errors.clone(),
                )));
                async move { manager }.boxed()
            }))
        };
        let monitor = Arc::new(DatabaseMonitor::new(
            managers.clone(),
            config.monitoring.clone(),
        ));

        Ok(Arc::new(Self {
            retry: RetryExecutor::new(config.retry.clone()),
            exporter: PrometheusExporter::new()?,
            config,
            pool_metrics,
            metrics,
            alerts,
            errors,
            managers,
            monitor,
        }))
    }

    pub async fn manager(&self) -> Result<Arc<DatabaseManager>> {
        self.managers.get_or_init().await
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn managers(&self) -> &Arc<ManagerCell> {
        &self.managers
    }

    pub fn pool_metrics(&self) -> &Arc<PoolMetrics> {
        &self.pool_metrics
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    pub fn retry_executor(&self) -> &RetryExecutor {
        &self.retry
    }

    pub fn monitor(&self) -> &Arc<DatabaseMonitor> {
        &self.monitor
    }

    pub fn exporter(&self) -> &PrometheusExporter {
        &self.exporter
    }

    /// Run one statement in its own session, retrying transient failures.
    pub async fn execute_with_retry(&self, sql: &str) -> Result<StatementResult> {
        let manager = self.manager().await?;
        self.retry
            .execute_with_retry(|| {
                let manager = manager.clone();
                async move {
                    let mut session = manager.acquire_session().await?;
                    let result = session.execute(sql).await?;
                    session.close().await?;
                    Ok::<_, DatabaseError>(result)
                }
            })
            .await
    }

    /// Clear pool counters and the rolling query metrics.
    pub fn reset_metrics(&self) {
        self.pool_metrics.reset();
        self.metrics.reset_metrics();
    }

    /// Stop the monitor and close the pool if one was built.
    pub async fn shutdown(&self) {
        self.monitor.stop().await;
        if let Some(manager) = self.managers.get() {
            manager.close().await;
        }
        info!("Observability context shut down");
    }
}
