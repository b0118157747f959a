pub mod driver;
pub mod manager;
pub mod pool;
pub mod pool_metrics;
pub mod postgres;
pub mod session;
pub mod statement;

pub use driver::{Driver, DriverConnection, DriverError, DriverErrorKind, StatementResult};
pub use manager::{DatabaseManager, DetailedPoolInfo, HealthProbeConfig, ManagerCell};
pub use pool::{
    ConnectionPool, InvalidateReason, PoolConfig, PoolEvent, PoolEventListener, PoolStatus,
    PooledConnection,
};
pub use pool_metrics::{PoolMetrics, PoolMetricsSnapshot};
pub use postgres::PgDriver;
pub use session::MonitoredSession;
pub use statement::QueryType;

#[cfg(test)]
pub(crate) mod test_support {
    use super::driver::*;
    use super::pool::{PoolEvent, PoolEventListener};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeState {
        connects: AtomicUsize,
        fail_connects: AtomicBool,
        fail_pings: AtomicBool,
        statement_error: Mutex<Option<DriverErrorKind>>,
        delay: Mutex<Duration>,
        executed: Mutex<Vec<String>>,
    }

    /// In-memory driver whose failures can be switched on per test.
    #[derive(Default)]
    pub(crate) struct FakeDriver {
        state: Arc<FakeState>,
    }

    impl FakeDriver {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn connects(&self) -> usize {
            self.state.connects.load(Ordering::SeqCst)
        }

        pub(crate) fn fail_connects(&self, fail: bool) {
            self.state.fail_connects.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_pings(&self, fail: bool) {
            self.state.fail_pings.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn fail_statements(&self, kind: Option<DriverErrorKind>) {
            *self.state.statement_error.lock() = kind;
        }

        pub(crate) fn set_delay(&self, delay: Duration) {
            *self.state.delay.lock() = delay;
        }

        pub(crate) fn executed(&self) -> Vec<String> {
            self.state.executed.lock().clone()
        }
    }

    #[async_trait]
    impl Driver for FakeDriver {
        async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
            if self.state.fail_connects.load(Ordering::SeqCst) {
                return Err(DriverError::new(
                    DriverErrorKind::ConnectionFailure,
                    "connection refused",
                ));
            }
            self.state.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeConnection {
                state: Arc::clone(&self.state),
            }))
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    struct FakeConnection {
        state: Arc<FakeState>,
    }

    #[async_trait]
    impl DriverConnection for FakeConnection {
        async fn execute(&mut self, sql: &str) -> Result<StatementResult, DriverError> {
            let delay = *self.state.delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let failure = self.state.statement_error.lock().clone();
            if let Some(kind) = failure {
                return Err(DriverError::new(kind, format!("scripted failure for {sql}")));
            }
            self.state.executed.lock().push(sql.to_string());
            if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
                Ok(StatementResult::row(vec![
                    Some("2026-10-19 12:00:00+00".to_string()),
                    Some("FakeDB 1.0".to_string()),
                    Some("fake".to_string()),
                ]))
            } else {
                Ok(StatementResult::affected(0))
            }
        }

        async fn ping(&mut self) -> Result<(), DriverError> {
            if self.state.fail_pings.load(Ordering::SeqCst) {
                return Err(DriverError::new(DriverErrorKind::ConnectionLost, "ping failed"));
            }
            Ok(())
        }

        async fn close(self: Box<Self>) -> Result<(), DriverError> {
            Ok(())
        }
    }

    #[derive(Default)]
    pub(crate) struct RecordingListener {
        events: Mutex<Vec<PoolEvent>>,
    }

    impl RecordingListener {
        pub(crate) fn events(&self) -> Vec<PoolEvent> {
            self.events.lock().clone()
        }
    }

    impl PoolEventListener for RecordingListener {
        fn on_event(&self, event: &PoolEvent) {
            self.events.lock().push(event.clone());
        }
    }
}
