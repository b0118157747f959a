use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::driver::{Driver, DriverConnection, DriverError, DriverErrorKind, StatementResult};
use super::statement::QueryType;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections kept open between checkouts.
    pub pool_size: usize,
    /// Extra connections allowed under burst load, closed on return.
    pub max_overflow: usize,
    pub pool_timeout_seconds: f64,
    /// Maximum connection age before it is replaced; 0 disables recycling.
    pub pool_recycle_seconds: u64,
    pub pool_pre_ping: bool,
    pub statement_timeout_seconds: f64,
    pub transaction_probe_timeout_seconds: f64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: 5,
            max_overflow: 10,
            pool_timeout_seconds: 30.0,
            pool_recycle_seconds: 3600,
            pool_pre_ping: true,
            statement_timeout_seconds: 60.0,
            transaction_probe_timeout_seconds: 10.0,
        }
    }
}

impl PoolConfig {
    pub fn capacity(&self) -> usize {
        self.pool_size + self.max_overflow
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.pool_timeout_seconds.max(0.0))
    }

    pub fn pool_recycle(&self) -> Option<Duration> {
        (self.pool_recycle_seconds > 0).then(|| Duration::from_secs(self.pool_recycle_seconds))
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.statement_timeout_seconds.max(0.0))
    }

    pub fn transaction_probe_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.transaction_probe_timeout_seconds.max(0.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidateReason {
    Recycled,
    PingFailed,
    Broken,
    TransactionAbandoned,
    Disposed,
}

/// Pool lifecycle events delivered synchronously to every listener.
#[derive(Debug, Clone)]
pub enum PoolEvent {
    Connect { id: u64, duration: Duration },
    ConnectFailed { duration: Duration, error: DriverError },
    Checkout { id: u64, checked_out: usize, wait: Duration },
    Checkin { id: u64, checked_out: usize },
    Invalidate { id: u64, reason: InvalidateReason },
    Close { id: u64 },
    AcquireTimeout { waited: Duration, exhausted: bool },
}

pub trait PoolEventListener: Send + Sync {
    fn on_event(&self, event: &PoolEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolStatus {
    pub pool_size: usize,
    pub max_overflow: usize,
    pub checked_out: usize,
    pub checked_in: usize,
    pub open: usize,
    pub overflow: usize,
    pub capacity: usize,
}

impl PoolStatus {
    /// Fraction of total capacity currently checked out.
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.checked_out as f64 / self.capacity as f64
    }
}

struct IdleConnection {
    id: u64,
    conn: Box<dyn DriverConnection>,
    created_at: Instant,
}

/// Bounded pool of driver connections.
///
/// At most `pool_size + max_overflow` connections are checked out at once; callers beyond
/// that wait up to `pool_timeout`. Returned connections are kept (most recent first) while
/// fewer than `pool_size` are idle and closed otherwise.
pub struct ConnectionPool {
    driver: Arc<dyn Driver>,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<IdleConnection>>,
    open: AtomicUsize,
    checked_out: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
    listeners: Vec<Arc<dyn PoolEventListener>>,
}

impl ConnectionPool {
    pub fn new(
        driver: Arc<dyn Driver>,
        config: PoolConfig,
        listeners: Vec<Arc<dyn PoolEventListener>>,
    ) -> Arc<Self> {
        info!(
            "Creating {} connection pool (size {}, overflow {}, timeout {:.1}s)",
            driver.name(),
            config.pool_size,
            config.max_overflow,
            config.pool_timeout_seconds
        );
        Arc::new(Self {
            permits: Arc::new(Semaphore::new(config.capacity())),
            driver,
            config,
            idle: Mutex::new(VecDeque::new()),
            open: AtomicUsize::new(0),
            checked_out: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            listeners,
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    pub fn driver_name(&self) -> &str {
        self.driver.name()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn emit(&self, event: PoolEvent) {
        for listener in &self.listeners {
            listener.on_event(&event);
        }
    }

    pub async fn acquire(self: &Arc<Self>) -> Result<PooledConnection, DriverError> {
        if self.is_closed() {
            return Err(pool_closed());
        }

        let started = Instant::now();
        let pool_timeout = self.config.pool_timeout();
        let permit = match timeout(pool_timeout, self.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(pool_closed()),
            Err(_) => {
                let waited = started.elapsed();
                self.emit(PoolEvent::AcquireTimeout {
                    waited,
                    exhausted: true,
                });
                warn!(
                    "Connection pool exhausted: {} checked out, waited {:.2}s",
                    self.checked_out.load(Ordering::Acquire),
                    waited.as_secs_f64()
                );
                return Err(DriverError::new(
                    DriverErrorKind::PoolExhausted,
                    format!(
                        "pool limit of size {} overflow {} reached, connection timed out, timeout {:.2}s",
                        self.config.pool_size, self.config.max_overflow, self.config.pool_timeout_seconds
                    ),
                ));
            }
        };

        while let Some(candidate) = self.pop_idle() {
            if let Some(max_age) = self.config.pool_recycle() {
                if candidate.created_at.elapsed() >= max_age {
                    debug!("Recycling connection {} after {:?}", candidate.id, max_age);
                    self.discard(candidate.id, candidate.conn, Some(InvalidateReason::Recycled));
                    continue;
                }
            }

            let IdleConnection {
                id,
                mut conn,
                created_at,
            } = candidate;

            if self.config.pool_pre_ping {
                let alive = matches!(timeout(pool_timeout, conn.ping()).await, Ok(Ok(())));
                if !alive {
                    warn!("Pre-ping failed for connection {}, discarding", id);
                    self.discard(id, conn, Some(InvalidateReason::PingFailed));
                    continue;
                }
            }

            return Ok(self.check_out(id, conn, created_at, permit, started));
        }

        let remaining = pool_timeout.saturating_sub(started.elapsed());
        let connect_started = Instant::now();
        match timeout(remaining, self.driver.connect()).await {
            Ok(Ok(conn)) => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                self.open.fetch_add(1, Ordering::AcqRel);
                self.emit(PoolEvent::Connect {
                    id,
                    duration: connect_started.elapsed(),
                });
                Ok(self.check_out(id, conn, Instant::now(), permit, started))
            }
            Ok(Err(error)) => {
                self.emit(PoolEvent::ConnectFailed {
                    duration: connect_started.elapsed(),
                    error: error.clone(),
                });
                Err(error)
            }
            Err(_) => {
                self.emit(PoolEvent::AcquireTimeout {
                    waited: started.elapsed(),
                    exhausted: false,
                });
                Err(DriverError::new(
                    DriverErrorKind::AcquireTimeout,
                    format!(
                        "timed out opening a new connection after {:.2}s",
                        started.elapsed().as_secs_f64()
                    ),
                ))
            }
        }
    }

    fn pop_idle(&self) -> Option<IdleConnection> {
        self.idle.lock().pop_back()
    }

    fn check_out(
        self: &Arc<Self>,
        id: u64,
        conn: Box<dyn DriverConnection>,
        created_at: Instant,
        permit: OwnedSemaphorePermit,
        started: Instant,
    ) -> PooledConnection {
        let checked_out = self.checked_out.fetch_add(1, Ordering::AcqRel) + 1;
        self.emit(PoolEvent::Checkout {
            id,
            checked_out,
            wait: started.elapsed(),
        });
        PooledConnection {
            pool: Arc::clone(self),
            conn: Some(conn),
            id,
            created_at,
            invalidated: None,
            in_transaction: false,
            _permit: permit,
        }
    }

    fn check_in(&self, id: u64, conn: Box<dyn DriverConnection>, created_at: Instant, reason: Option<InvalidateReason>) {
        let checked_out = self.checked_out.fetch_sub(1, Ordering::AcqRel).saturating_sub(1);
        self.emit(PoolEvent::Checkin { id, checked_out });

        let reason = reason.or_else(|| self.is_closed().then_some(InvalidateReason::Disposed));
        if reason.is_none() {
            let mut idle = self.idle.lock();
            if idle.len() < self.config.pool_size {
                idle.push_back(IdleConnection { id, conn, created_at });
                return;
            }
        }
        self.discard(id, conn, reason);
    }

    /// Close a physical connection in the background.
    fn discard(&self, id: u64, conn: Box<dyn DriverConnection>, reason: Option<InvalidateReason>) {
        if let Some(reason) = reason {
            self.emit(PoolEvent::Invalidate { id, reason });
        }
        self.open.fetch_sub(1, Ordering::AcqRel);
        self.emit(PoolEvent::Close { id });

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        debug!("Error closing connection {}: {}", id, e);
                    }
                });
            }
            Err(_) => drop(conn),
        }
    }

    pub fn status(&self) -> PoolStatus {
        let open = self.open.load(Ordering::Acquire);
        PoolStatus {
            pool_size: self.config.pool_size,
            max_overflow: self.config.max_overflow,
            checked_out: self.checked_out.load(Ordering::Acquire),
            checked_in: self.idle.lock().len(),
            open,
            overflow: open.saturating_sub(self.config.pool_size),
            capacity: self.config.capacity(),
        }
    }

    /// Close idle connections and refuse further checkouts. Checked-out connections are
    /// closed as they come back. Returns the number of idle connections closed.
    pub fn dispose(&self) -> usize {
        if self.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.permits.close();
        let drained: Vec<IdleConnection> = self.idle.lock().drain(..).collect();
        let count = drained.len();
        for idle in drained {
            self.discard(idle.id, idle.conn, Some(InvalidateReason::Disposed));
        }
        info!("Connection pool disposed ({} idle connections closed)", count);
        count
    }
}

fn pool_closed() -> DriverError {
    DriverError::new(DriverErrorKind::ConnectionFailure, "connection pool is disposed")
}

/// A checked-out connection. Dropping it returns the connection to the pool, or closes
/// it when it was invalidated or still has a transaction open.
pub struct PooledConnection {
    pool: Arc<ConnectionPool>,
    conn: Option<Box<dyn DriverConnection>>,
    id: u64,
    created_at: Instant,
    invalidated: Option<InvalidateReason>,
    in_transaction: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn is_invalidated(&self) -> bool {
        self.invalidated.is_some()
    }

    pub fn invalidate(&mut self, reason: InvalidateReason) {
        self.invalidated.get_or_insert(reason);
    }

    /// Execute one statement under the pool's statement timeout.
    ///
    /// A timed-out statement leaves the connection in an unknown state, so it is
    /// invalidated. Lost connections are invalidated as well.
    pub async fn execute(&mut self, sql: &str) -> Result<StatementResult, DriverError> {
        let statement_timeout = self.pool.config.statement_timeout();
        let conn = match self.conn.as_mut() {
            Some(conn) if self.invalidated.is_none() => conn,
            _ => {
                return Err(DriverError::new(
                    DriverErrorKind::ConnectionLost,
                    format!("connection {} is invalidated", self.id),
                ))
            }
        };

        match timeout(statement_timeout, conn.execute(sql)).await {
            Ok(Ok(result)) => {
                let query_type = QueryType::from_sql(sql);
                if query_type.opens_transaction() {
                    self.in_transaction = true;
                } else if query_type.closes_transaction() {
                    self.in_transaction = false;
                }
                Ok(result)
            }
            Ok(Err(error)) => {
                if matches!(
                    error.kind,
                    DriverErrorKind::ConnectionLost | DriverErrorKind::ConnectionFailure
                ) {
                    self.invalidate(InvalidateReason::Broken);
                }
                Err(error)
            }
            Err(_) => {
                self.invalidate(InvalidateReason::Broken);
                Err(DriverError::new(
                    DriverErrorKind::StatementTimeout,
                    format!(
                        "statement exceeded {:.2}s timeout",
                        statement_timeout.as_secs_f64()
                    ),
                ))
            }
        }
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        let reason = self
            .invalidated
            .or_else(|| self.in_transaction.then_some(InvalidateReason::TransactionAbandoned));
        self.pool.check_in(self.id, conn, self.created_at, reason);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{FakeDriver, RecordingListener};

    fn config(pool_size: usize, max_overflow: usize) -> PoolConfig {
        PoolConfig {
            pool_size,
            max_overflow,
            pool_timeout_seconds: 0.2,
            ..PoolConfig::default()
        }
    }

    #[tokio::test]
    async fn test_connections_are_reused() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver.clone(), config(2, 0), vec![]);

        let first_id = {
            let conn = pool.acquire().await.unwrap();
            conn.id()
        };
        let second = pool.acquire().await.unwrap();

        assert_eq!(second.id(), first_id);
        assert_eq!(driver.connects(), 1);
        assert_eq!(pool.status().checked_out, 1);
    }

    #[tokio::test]
    async fn test_exhaustion_times_out() {
        let driver = FakeDriver::new();
        let listener = Arc::new(RecordingListener::default());
        let pool = ConnectionPool::new(driver, config(1, 1), vec![listener.clone()]);

        let _a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        let err = pool.acquire().await.err().unwrap();

        assert_eq!(err.kind, DriverErrorKind::PoolExhausted);
        assert!(listener
            .events()
            .iter()
            .any(|e| matches!(e, PoolEvent::AcquireTimeout { exhausted: true, .. })));
    }

    #[tokio::test]
    async fn test_overflow_connections_are_closed_on_return() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver, config(1, 2), vec![]);

        let a = pool.acquire().await.unwrap();
        let b = pool.acquire().await.unwrap();
        let c = pool.acquire().await.unwrap();
        assert_eq!(pool.status().open, 3);
        assert_eq!(pool.status().overflow, 2);

        drop(a);
        drop(b);
        drop(c);

        let status = pool.status();
        assert_eq!(status.checked_out, 0);
        assert_eq!(status.checked_in, 1);
        assert_eq!(status.open, 1);
    }

    #[tokio::test]
    async fn test_open_transaction_is_discarded() {
        let driver = FakeDriver::new();
        let listener = Arc::new(RecordingListener::default());
        let pool = ConnectionPool::new(driver, config(2, 0), vec![listener.clone()]);

        let mut conn = pool.acquire().await.unwrap();
        conn.execute("BEGIN").await.unwrap();
        assert!(conn.in_transaction());
        drop(conn);

        assert_eq!(pool.status().checked_in, 0);
        assert!(listener.events().iter().any(|e| matches!(
            e,
            PoolEvent::Invalidate {
                reason: InvalidateReason::TransactionAbandoned,
                ..
            }
        )));
    }

    #[tokio::test]
    async fn test_failed_pre_ping_opens_fresh_connection() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver.clone(), config(1, 0), vec![]);

        drop(pool.acquire().await.unwrap());
        driver.fail_pings(true);
        let conn = pool.acquire().await.unwrap();

        assert_eq!(driver.connects(), 2);
        assert_eq!(conn.id(), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let driver = FakeDriver::new();
        driver.fail_connects(true);
        let listener = Arc::new(RecordingListener::default());
        let pool = ConnectionPool::new(driver, config(1, 0), vec![listener.clone()]);

        let err = pool.acquire().await.err().unwrap();
        assert_eq!(err.kind, DriverErrorKind::ConnectionFailure);
        assert!(listener
            .events()
            .iter()
            .any(|e| matches!(e, PoolEvent::ConnectFailed { .. })));
        // The permit is released again.
        assert_eq!(pool.status().checked_out, 0);
    }

    #[tokio::test]
    async fn test_statement_timeout_invalidates_connection() {
        let driver = FakeDriver::new();
        driver.set_delay(Duration::from_millis(200));
        let pool = ConnectionPool::new(
            driver,
            PoolConfig {
                statement_timeout_seconds: 0.05,
                ..config(1, 0)
            },
            vec![],
        );

        let mut conn = pool.acquire().await.unwrap();
        let err = conn.execute("SELECT pg_sleep(1)").await.unwrap_err();
        assert_eq!(err.kind, DriverErrorKind::StatementTimeout);
        assert!(conn.is_invalidated());
    }

    #[tokio::test]
    async fn test_dispose_rejects_new_checkouts() {
        let driver = FakeDriver::new();
        let pool = ConnectionPool::new(driver, config(2, 0), vec![]);
        drop(pool.acquire().await.unwrap());

        assert_eq!(pool.dispose(), 1);
        assert!(pool.is_closed());
        assert!(pool.acquire().await.is_err());
        assert_eq!(pool.status().open, 0);
    }

    #[test]
    fn test_utilization() {
        let status = PoolStatus {
            pool_size: 5,
            max_overflow: 5,
            checked_out: 9,
            checked_in: 0,
            open: 9,
            overflow: 4,
            capacity: 10,
        };
        assert!((status.utilization() - 0.9).abs() < f64::EPSILON);
    }
}
