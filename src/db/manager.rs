use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::driver::{Driver, DriverError, DriverErrorKind};
use super::pool::{ConnectionPool, PoolConfig, PoolEventListener, PoolStatus};
use super::pool_metrics::{PoolMetrics, PoolMetricsSnapshot};
use super::session::MonitoredSession;
use crate::error::{DatabaseError, Result};
use crate::monitoring::errors::{ErrorContext, ErrorTracker};
use crate::monitoring::health::{HealthCheckResult, ServerInfo};
use crate::monitoring::metrics::MetricsCollector;
use crate::monitoring::HealthStatus;

/// Statements and limits used by the health check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbeConfig {
    pub connectivity_sql: String,
    /// Must return server time, version and database name as the first three columns.
    pub server_info_sql: String,
    /// Runs inside the probe transaction, which is always rolled back.
    pub transaction_sql: String,
    /// Pool utilization at or above this fraction fails the pool check.
    pub max_utilization: f64,
}

impl Default for HealthProbeConfig {
    fn default() -> Self {
        Self {
            connectivity_sql: "SELECT 1".to_string(),
            server_info_sql:
                "SELECT now()::text AS server_time, version() AS db_version, current_database()::text AS db_name"
                    .to_string(),
            transaction_sql: "SELECT 1".to_string(),
            max_utilization: 0.9,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthIndicators {
    pub pool_utilization: f64,
    pub success_rate: f64,
    pub average_connection_time_ms: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetailedPoolInfo {
    pub driver: String,
    #[serde(flatten)]
    pub status: PoolStatus,
    pub metrics: PoolMetricsSnapshot,
    pub pool_configuration: PoolConfig,
    pub health_indicators: HealthIndicators,
}

/// Owns the connection pool and hands out monitored sessions.
///
/// The pool can be torn down and rebuilt while the manager is shared; callers that arrive
/// mid-rebuild get [`DatabaseError::NotInitialized`] rather than waiting.
pub struct DatabaseManager {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    probes: HealthProbeConfig,
    pool: RwLock<Option<Arc<ConnectionPool>>>,
    pool_metrics: Arc<PoolMetrics>,
    metrics: Arc<MetricsCollector>,
    errors: Arc<ErrorTracker>,
    rebuild: Mutex<()>,
    pools_created: AtomicUsize,
    closed: AtomicBool,
}

impl DatabaseManager {
    pub fn new(
        driver: Arc<dyn Driver>,
        config: PoolConfig,
        probes: HealthProbeConfig,
        pool_metrics: Arc<PoolMetrics>,
        metrics: Arc<MetricsCollector>,
        errors: Arc<ErrorTracker>,
    ) -> Self {
        let manager = Self {
            driver,
            config,
            probes,
            pool: RwLock::new(None),
            pool_metrics,
            metrics,
            errors,
            rebuild: Mutex::new(()),
            pools_created: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        };
        *manager.pool.write() = Some(manager.build_pool());
        info!("Database manager initialized");
        manager
    }

    fn build_pool(&self) -> Arc<ConnectionPool> {
        let listeners = vec![
            self.pool_metrics.clone() as Arc<dyn PoolEventListener>,
            self.metrics.clone() as Arc<dyn PoolEventListener>,
        ];
        self.pools_created.fetch_add(1, Ordering::SeqCst);
        ConnectionPool::new(self.driver.clone(), self.config.clone(), listeners)
    }

    fn current_pool(&self) -> Option<Arc<ConnectionPool>> {
        self.pool.read().clone().filter(|pool| !pool.is_closed())
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn probes(&self) -> &HealthProbeConfig {
        &self.probes
    }

    pub fn pool_metrics(&self) -> &Arc<PoolMetrics> {
        &self.pool_metrics
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    pub fn errors(&self) -> &Arc<ErrorTracker> {
        &self.errors
    }

    /// Number of pools built over the manager's lifetime, rebuilds included.
    pub fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub async fn acquire_session(&self) -> Result<MonitoredSession> {
        let pool = self.current_pool().ok_or(DatabaseError::NotInitialized)?;
        match pool.acquire().await {
            Ok(conn) => Ok(MonitoredSession::new(
                conn,
                self.metrics.clone(),
                self.errors.clone(),
            )),
            // Disposed while we were waiting for a permit.
            Err(_) if pool.is_closed() => Err(DatabaseError::NotInitialized),
            Err(e) => {
                self.errors
                    .track_driver_error(&e, ErrorContext::new().with("operation", "acquire_session"));
                Err(e.into())
            }
        }
    }

    /// Run the connectivity probe through a monitored session.
    pub async fn test_connection(&self) -> bool {
        match self.run_connectivity_probe().await {
            Ok(()) => {
                debug!("Database connection test successful");
                true
            }
            Err(e) => {
                error!("Database connection test failed: {}", e);
                false
            }
        }
    }

    async fn run_connectivity_probe(&self) -> Result<()> {
        let mut session = self.acquire_session().await?;
        session.execute(&self.probes.connectivity_sql).await?;
        session.close().await
    }

    pub fn connection_info(&self) -> Option<PoolStatus> {
        self.current_pool().map(|pool| pool.status())
    }

    pub fn detailed_pool_info(&self) -> Result<DetailedPoolInfo> {
        let pool = self.current_pool().ok_or(DatabaseError::NotInitialized)?;
        let status = pool.status();
        let metrics = self.pool_metrics.snapshot();
        Ok(DetailedPoolInfo {
            driver: pool.driver_name().to_string(),
            status,
            health_indicators: HealthIndicators {
                pool_utilization: status.utilization(),
                success_rate: metrics.success_rate,
                average_connection_time_ms: metrics.average_connection_time_ms,
            },
            metrics,
            pool_configuration: self.config.clone(),
        })
    }

    /// Record a pool utilization sample in the metrics collector.
    pub fn sample_pool_utilization(&self) -> Option<f64> {
        let status = self.connection_info()?;
        Some(
            self.metrics
                .record_pool_utilization(status.pool_size, status.checked_out, status.max_overflow),
        )
    }

    /// Dispose the current pool and build a fresh one.
    pub async fn recreate_engine(&self) -> Result<()> {
        let _guard = self.rebuild.lock().await;
        if self.is_closed() {
            return Err(DatabaseError::NotInitialized);
        }
        warn!("Recreating database connection pool");

        let old = self.pool.write().take();
        if let Some(old) = old {
            let closed = old.dispose();
            debug!("Disposed old pool, closed {} idle connections", closed);
        }

        let pool = self.build_pool();
        *self.pool.write() = Some(pool);
        info!("Database connection pool recreated");
        Ok(())
    }

    pub async fn close(&self) {
        let _guard = self.rebuild.lock().await;
        self.closed.store(true, Ordering::Release);
        let pool = self.pool.write().take();
        if let Some(pool) = pool {
            pool.dispose();
            info!("Database connections closed");
        }
    }

    /// Probe connectivity, pool pressure, query execution and transactions, rebuilding
    /// the pool once if the first probe fails.
    pub async fn health_check_with_recovery(&self) -> HealthCheckResult {
        let started = Instant::now();
        let mut result = HealthCheckResult::pending();

        if let Err(e) = self.run_health_sequence(&mut result).await {
            error!("Health check failed: {}", e);
            result.status = HealthStatus::Error;
            result.error = Some(e.to_string());
        }

        result.metrics = Some(self.pool_metrics.snapshot());
        result.duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        result
    }

    async fn run_health_sequence(&self, result: &mut HealthCheckResult) -> Result<()> {
        result.checks.basic_connection = self.test_connection().await;

        if !result.checks.basic_connection {
            warn!("Basic connection test failed, attempting engine recreation");
            result
                .recovery_actions
                .push("attempted_engine_recreation".to_string());
            match self.recreate_engine().await {
                Ok(()) => {
                    result.checks.basic_connection = self.test_connection().await;
                    if result.checks.basic_connection {
                        info!("✅ Database recovered after engine recreation");
                        result
                            .recovery_actions
                            .push("engine_recreation_successful".to_string());
                    }
                }
                Err(e) => {
                    error!("Engine recreation failed: {}", e);
                    result
                        .recovery_actions
                        .push(format!("engine_recreation_failed: {e}"));
                }
            }
        }

        let pool_info = self.detailed_pool_info()?;
        result.checks.pool_status =
            pool_info.health_indicators.pool_utilization < self.probes.max_utilization;
        result.pool_info = Some(pool_info);

        if result.checks.basic_connection {
            if let Err(e) = self.run_advanced_checks(result).await {
                warn!("Advanced health checks failed: {}", e);
                result.advanced_check_error = Some(e.to_string());
            }
        }

        result.determine_overall_status();
        Ok(())
    }

    async fn run_advanced_checks(&self, result: &mut HealthCheckResult) -> Result<()> {
        let mut session = self.acquire_session().await?;

        let server = session.execute(&self.probes.server_info_sql).await?;
        if let Some(row) = server.first_row {
            result.server_info = Some(ServerInfo::from_row(&row));
            result.checks.query_execution = true;
        }

        let probe_timeout = self.config.transaction_probe_timeout();
        let probe = async {
            session.begin().await?;
            session.execute(&self.probes.transaction_sql).await?;
            session.rollback().await
        };
        match timeout(probe_timeout, probe).await {
            Ok(outcome) => outcome?,
            Err(_) => {
                // The session is dropped mid-transaction and its connection discarded.
                let message = format!(
                    "transaction probe timed out after {:.1}s",
                    probe_timeout.as_secs_f64()
                );
                let kind = DriverErrorKind::TransactionTimeout;
                self.errors.track_error(
                    kind.as_str(),
                    &message,
                    ErrorContext::new().with("operation", "health_check"),
                );
                return Err(DriverError::new(kind, message).into());
            }
        }
        result.checks.transaction_test = true;

        session.close().await
    }
}

type ManagerFactory = Box<dyn Fn() -> BoxFuture<'static, Result<Arc<DatabaseManager>>> + Send + Sync>;

/// Lazily built, shared [`DatabaseManager`].
///
/// Reads after initialization take no lock. On a miss, callers serialize on an async mutex
/// and re-check, so concurrent first callers build exactly one manager.
pub struct ManagerCell {
    cell: OnceLock<Arc<DatabaseManager>>,
    init_lock: Mutex<()>,
    factory: ManagerFactory,
    constructions: AtomicUsize,
}

impl ManagerCell {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<DatabaseManager>>> + Send + Sync + 'static,
    {
        Self {
            cell: OnceLock::new(),
            init_lock: Mutex::new(()),
            factory: Box::new(factory),
            constructions: AtomicUsize::new(0),
        }
    }

    pub async fn get_or_init(&self) -> Result<Arc<DatabaseManager>> {
        if let Some(manager) = self.cell.get() {
            return Ok(manager.clone());
        }

        let _guard = self.init_lock.lock().await;
        if let Some(manager) = self.cell.get() {
            return Ok(manager.clone());
        }

        self.constructions.fetch_add(1, Ordering::SeqCst);
        let manager = (self.factory)().await?;
        Ok(self.cell.get_or_init(|| manager).clone())
    }

    pub fn get(&self) -> Option<Arc<DatabaseManager>> {
        self.cell.get().cloned()
    }

    /// How many times the factory has run.
    pub fn constructions(&self) -> usize {
        self.constructions.load(Ordering::SeqCst)
    }
}
