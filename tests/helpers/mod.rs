//! Scripted in-memory driver shared by the integration suites.
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use poolwatch::db::{Driver, DriverConnection, DriverError, DriverErrorKind, StatementResult};
use poolwatch::{Config, ObservabilityContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct Script {
    connects: AtomicUsize,
    connect_failures: AtomicUsize,
    statement_failures: Mutex<Option<(usize, DriverErrorKind)>>,
    statements: Mutex<Vec<String>>,
    delay: Mutex<Duration>,
}

/// Driver whose next N connects or statements can be scripted to fail.
#[derive(Default, Clone)]
pub struct ScriptedDriver {
    script: Arc<Script>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.script.connect_failures.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_statements(&self, count: usize, kind: DriverErrorKind) {
        *self.script.statement_failures.lock() = Some((count, kind));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.script.delay.lock() = delay;
    }

    /// Successful physical connects.
    pub fn connects(&self) -> usize {
        self.script.connects.load(Ordering::SeqCst)
    }

    /// Every statement attempted, failed ones included.
    pub fn statements(&self) -> Vec<String> {
        self.script.statements.lock().clone()
    }

    pub fn statements_matching(&self, sql: &str) -> usize {
        self.script.statements.lock().iter().filter(|s| *s == sql).count()
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl Driver for ScriptedDriver {
    async fn connect(&self) -> Result<Box<dyn DriverConnection>, DriverError> {
        if take_one(&self.script.connect_failures) {
            return Err(DriverError::new(
                DriverErrorKind::ConnectionFailure,
                "could not connect to server: Connection refused",
            ));
        }
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedConnection {
            script: Arc::clone(&self.script),
        }))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

struct ScriptedConnection {
    script: Arc<Script>,
}

#[async_trait]
impl DriverConnection for ScriptedConnection {
    async fn execute(&mut self, sql: &str) -> Result<StatementResult, DriverError> {
        self.script.statements.lock().push(sql.to_string());

        let delay = *self.script.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let failure = {
            let mut failures = self.script.statement_failures.lock();
            match failures.as_mut() {
                Some((remaining, kind)) if *remaining > 0 => {
                    *remaining -= 1;
                    Some(kind.clone())
                }
                _ => None,
            }
        };
        if let Some(kind) = failure {
            return Err(DriverError::new(kind, "scripted failure"));
        }

        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            Ok(StatementResult::row(vec![
                Some("2026-10-19 09:30:00+00".to_string()),
                Some("ScriptedDB 2.1".to_string()),
                Some("scripted".to_string()),
            ]))
        } else {
            Ok(StatementResult::affected(1))
        }
    }

    async fn ping(&mut self) -> Result<(), DriverError> {
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<(), DriverError> {
        Ok(())
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.pool.pool_size = 2;
    config.pool.max_overflow = 1;
    config.pool.pool_timeout_seconds = 1.0;
    config.retry.jitter = false;
    config
}

pub fn context_with(config: Config, driver: &ScriptedDriver) -> Arc<ObservabilityContext> {
    ObservabilityContext::new(config, Arc::new(driver.clone())).expect("context")
}

pub fn context(driver: &ScriptedDriver) -> Arc<ObservabilityContext> {
    context_with(test_config(), driver)
}
