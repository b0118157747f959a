use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

use super::pool::{InvalidateReason, PoolEvent, PoolEventListener};

/// Process-wide connection counters fed by pool lifecycle events.
#[derive(Debug)]
pub struct PoolMetrics {
    connection_attempts: AtomicU64,
    successful_connections: AtomicU64,
    failed_connections: AtomicU64,
    connection_timeouts: AtomicU64,
    pool_exhausted_count: AtomicU64,
    total_connection_time_us: AtomicU64,
    peak_connections: AtomicUsize,
    last_reset: RwLock<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolMetricsSnapshot {
    pub connection_attempts: u64,
    pub successful_connections: u64,
    pub failed_connections: u64,
    pub connection_timeouts: u64,
    pub pool_exhausted_count: u64,
    pub success_rate: f64,
    pub average_connection_time_ms: f64,
    pub peak_connections: usize,
    pub last_reset: DateTime<Utc>,
}

impl Default for PoolMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolMetrics {
    pub fn new() -> Self {
        Self {
            connection_attempts: AtomicU64::new(0),
            successful_connections: AtomicU64::new(0),
            failed_connections: AtomicU64::new(0),
            connection_timeouts: AtomicU64::new(0),
            pool_exhausted_count: AtomicU64::new(0),
            total_connection_time_us: AtomicU64::new(0),
            peak_connections: AtomicUsize::new(0),
            last_reset: RwLock::new(Utc::now()),
        }
    }

    pub fn record_connection_attempt(&self, success: bool, duration: Duration) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
        self.total_connection_time_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
        if success {
            self.successful_connections.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_connections.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_timeout(&self) {
        self.connection_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pool_exhausted(&self) {
        self.pool_exhausted_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn update_peak_connections(&self, current: usize) {
        self.peak_connections.fetch_max(current, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let attempts = self.connection_attempts.load(Ordering::Relaxed);
        let successes = self.successful_connections.load(Ordering::Relaxed);
        let total_us = self.total_connection_time_us.load(Ordering::Relaxed);

        let (success_rate, average_connection_time_ms) = if attempts == 0 {
            (0.0, 0.0)
        } else {
            (
                successes as f64 / attempts as f64,
                (total_us as f64 / attempts as f64 / 1000.0 * 100.0).round() / 100.0,
            )
        };

        PoolMetricsSnapshot {
            connection_attempts: attempts,
            successful_connections: successes,
            failed_connections: self.failed_connections.load(Ordering::Relaxed),
            connection_timeouts: self.connection_timeouts.load(Ordering::Relaxed),
            pool_exhausted_count: self.pool_exhausted_count.load(Ordering::Relaxed),
            success_rate,
            average_connection_time_ms,
            peak_connections: self.peak_connections.load(Ordering::Relaxed),
            last_reset: *self.last_reset.read(),
        }
    }

    pub fn reset(&self) {
        self.connection_attempts.store(0, Ordering::Relaxed);
        self.successful_connections.store(0, Ordering::Relaxed);
        self.failed_connections.store(0, Ordering::Relaxed);
        self.connection_timeouts.store(0, Ordering::Relaxed);
        self.pool_exhausted_count.store(0, Ordering::Relaxed);
        self.total_connection_time_us.store(0, Ordering::Relaxed);
        self.peak_connections.store(0, Ordering::Relaxed);
        *self.last_reset.write() = Utc::now();
        debug!("Pool metrics reset");
    }
}

impl PoolEventListener for PoolMetrics {
    fn on_event(&self, event: &PoolEvent) {
        match event {
            PoolEvent::Checkout {
                checked_out, wait, ..
            } => {
                self.record_connection_attempt(true, *wait);
                self.update_peak_connections(*checked_out);
            }
            PoolEvent::ConnectFailed { duration, error } => {
                warn!("Database connection failed: {}", error);
                self.record_connection_attempt(false, *duration);
            }
            PoolEvent::Invalidate { id, reason } => {
                if matches!(reason, InvalidateReason::PingFailed | InvalidateReason::Broken) {
                    warn!("Database connection {} invalidated ({:?})", id, reason);
                    self.record_connection_attempt(false, Duration::ZERO);
                }
            }
            PoolEvent::AcquireTimeout { waited, exhausted } => {
                self.record_timeout();
                self.record_connection_attempt(false, *waited);
                if *exhausted {
                    self.record_pool_exhausted();
                }
            }
            PoolEvent::Connect { id, .. } => debug!("New database connection {} established", id),
            PoolEvent::Checkin { .. } | PoolEvent::Close { .. } => {}
        }
    }
}
