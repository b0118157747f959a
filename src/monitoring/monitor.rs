use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::health::HealthCheckResult;
use super::{AlertType, HealthStatus};
use crate::db::manager::{DetailedPoolInfo, ManagerCell};
use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub health_check_interval_seconds: u64,
    pub metrics_reset_interval_seconds: u64,
    pub max_history: usize,
    /// Minimum delay before the next tick after a failed one.
    pub error_backoff_seconds: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 30,
            metrics_reset_interval_seconds: 3600,
            max_history: 100,
            error_backoff_seconds: 60,
        }
    }
}

impl MonitoringConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    fn failure_delay(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds.max(self.error_backoff_seconds))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatus {
    pub is_running: bool,
    pub health_check_interval: u64,
    pub metrics_reset_interval: u64,
    pub last_metrics_reset: DateTime<Utc>,
    pub health_history_size: usize,
    pub max_history_size: usize,
    pub total_checks: u64,
    pub last_status: Option<HealthStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComprehensiveStatus {
    pub monitoring: MonitoringStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_health: Option<HealthCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pool_info: Option<DetailedPoolInfo>,
    pub recent_history: Vec<HealthCheckResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

struct RunningLoop {
    shutdown_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Background health checks and periodic pool-metrics resets.
pub struct DatabaseMonitor {
    managers: Arc<ManagerCell>,
    config: MonitoringConfig,
    history: RwLock<VecDeque<HealthCheckResult>>,
    last_metrics_reset: RwLock<DateTime<Utc>>,
    total_checks: AtomicU64,
    running: Mutex<Option<RunningLoop>>,
}

impl DatabaseMonitor {
    pub fn new(managers: Arc<ManagerCell>, config: MonitoringConfig) -> Self {
        Self {
            managers,
            history: RwLock::new(VecDeque::with_capacity(config.max_history)),
            config,
            last_metrics_reset: RwLock::new(Utc::now()),
            total_checks: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &MonitoringConfig {
        &self.config
    }

    /// Spawn the monitoring loop. Returns false if it is already running.
    pub async fn start(self: &Arc<Self>) -> bool {
        let mut running = self.running.lock().await;
        if running.as_ref().is_some_and(|r| !r.handle.is_finished()) {
            warn!("Database monitoring is already running");
            return false;
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move { monitor.run(shutdown_rx).await });
        *running = Some(RunningLoop { shutdown_tx, handle });

        info!(
            "🔍 Started database monitoring with {}s interval",
            self.config.health_check_interval_seconds
        );
        true
    }

    /// Signal the loop and wait for the tick in progress to finish.
    pub async fn stop(&self) -> bool {
        let Some(running) = self.running.lock().await.take() else {
            return false;
        };
        let _ = running.shutdown_tx.send(());
        if let Err(e) = running.handle.await {
            error!("Monitoring task ended abnormally: {}", e);
        }
        info!("Stopped database monitoring");
        true
    }

    pub async fn is_running(&self) -> bool {
        self.running
            .lock()
            .await
            .as_ref()
            .is_some_and(|r| !r.handle.is_finished())
    }

    async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        loop {
            let delay = match self.tick().await {
                Ok(status) if status != HealthStatus::Error => self.config.health_check_interval(),
                Ok(_) => self.config.failure_delay(),
                Err(e) => {
                    error!("Error in monitoring loop: {}", e);
                    self.config.failure_delay()
                }
            };

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(delay) => {}
            }
        }
        debug!("Monitoring loop exited");
    }

    /// Run one health check, store it and apply the follow-up actions.
    pub async fn tick(&self) -> Result<HealthStatus> {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let manager = match self.managers.get_or_init().await {
            Ok(manager) => manager,
            Err(e) => {
                self.push_history(HealthCheckResult::failed(e.to_string()));
                return Err(e);
            }
        };

        let result = manager.health_check_with_recovery().await;
        let status = result.status;
        match status {
            HealthStatus::Unhealthy | HealthStatus::Error => {
                error!("Database health check failed: {:?}", result.error)
            }
            HealthStatus::Degraded => warn!(
                "Database health degraded: {:?}",
                result.advanced_check_error
            ),
            HealthStatus::Healthy => debug!("Database health check passed"),
        }
        if !result.recovery_actions.is_empty() {
            info!("Database recovery actions taken: {:?}", result.recovery_actions);
        }
        self.push_history(result);

        manager.sample_pool_utilization();
        if status == HealthStatus::Healthy {
            let resolved = manager.errors().alerts().resolve_where(
                |alert| alert.alert_type == AlertType::ConnectionFailure,
                "database connectivity restored",
            );
            if resolved > 0 {
                info!("Resolved {} connection failure alerts", resolved);
            }
        }
        manager.errors().evaluate_recovery();
        manager.errors().alerts().expire_stale_alerts();

        let now = Utc::now();
        let reset_interval = ChronoDuration::seconds(self.config.metrics_reset_interval_seconds as i64);
        if now - *self.last_metrics_reset.read() >= reset_interval {
            info!("Resetting connection pool metrics");
            manager.pool_metrics().reset();
            *self.last_metrics_reset.write() = now;
        }

        Ok(status)
    }

    fn push_history(&self, result: HealthCheckResult) {
        let mut history = self.history.write();
        history.push_back(result);
        while history.len() > self.config.max_history {
            history.pop_front();
        }
    }

    /// Most recent results, oldest first.
    pub fn health_history(&self, limit: usize) -> Vec<HealthCheckResult> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    pub async fn monitoring_status(&self) -> MonitoringStatus {
        let (size, last_status) = {
            let history = self.history.read();
            (history.len(), history.back().map(|r| r.status))
        };
        MonitoringStatus {
            is_running: self.is_running().await,
            health_check_interval: self.config.health_check_interval_seconds,
            metrics_reset_interval: self.config.metrics_reset_interval_seconds,
            last_metrics_reset: *self.last_metrics_reset.read(),
            health_history_size: size,
            max_history_size: self.config.max_history,
            total_checks: self.total_checks.load(Ordering::Relaxed),
            last_status,
        }
    }

    /// Fresh health check plus pool info and recent history.
    pub async fn comprehensive_status(&self) -> ComprehensiveStatus {
        let monitoring = self.monitoring_status().await;
        let recent_history = self.health_history(5);

        let current = async {
            let manager = self.managers.get_or_init().await?;
            let health = manager.health_check_with_recovery().await;
            let pool_info = manager.detailed_pool_info().ok();
            Result::Ok((health, pool_info))
        };
        match current.await {
            Ok((health, pool_info)) => ComprehensiveStatus {
                monitoring,
                current_health: Some(health),
                pool_info,
                recent_history,
                error: None,
            },
            Err(e) => {
                error!("Error getting comprehensive status: {}", e);
                ComprehensiveStatus {
                    monitoring,
                    current_health: None,
                    pool_info: None,
                    recent_history,
                    error: Some(e.to_string()),
                }
            }
        }
    }
}
