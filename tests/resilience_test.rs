mod helpers;

use helpers::{context, context_with, test_config, ScriptedDriver};
use poolwatch::db::DriverErrorKind;
use poolwatch::{AlertType, Classify, HealthStatus};
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_transient_failures_are_retried_with_backoff() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    driver.fail_next_statements(2, DriverErrorKind::ConnectionLost);

    let started = Instant::now();
    let result = ctx.execute_with_retry("SELECT 1").await.unwrap();

    assert!(result.first_row.is_some());
    assert_eq!(driver.statements_matching("SELECT 1"), 3);
    // 1s then 2s with jitter disabled.
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert_eq!(ctx.errors().counts_by_type()["ConnectionLost"], 2);
}

#[tokio::test(start_paused = true)]
async fn test_constraint_violations_are_not_retried() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    driver.fail_next_statements(1, DriverErrorKind::UniqueViolation);

    let started = Instant::now();
    let err = ctx
        .execute_with_retry("INSERT INTO users (email) VALUES ('a@b.c')")
        .await
        .unwrap_err();

    assert_eq!(err.driver_kind(), Some(&DriverErrorKind::UniqueViolation));
    assert!(!err.is_retryable());
    assert_eq!(err.classification().status_code, 409);
    assert_eq!(driver.statements().len(), 1);
    assert!(started.elapsed() < Duration::from_millis(10));
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_retries_return_the_last_error() {
    let driver = ScriptedDriver::new();
    let mut config = test_config();
    config.retry.max_retries = 2;
    let ctx = context_with(config, &driver);
    driver.fail_next_statements(10, DriverErrorKind::StatementTimeout);

    let err = ctx.execute_with_retry("SELECT 1").await.unwrap_err();

    assert_eq!(err.driver_kind(), Some(&DriverErrorKind::StatementTimeout));
    assert_eq!(err.classification().status_code, 504);
    assert_eq!(driver.statements_matching("SELECT 1"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_monitor_loop_checks_on_interval_and_stops() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    let monitor = ctx.monitor();

    assert!(monitor.start().await);
    assert!(!monitor.start().await);
    tokio::time::sleep(Duration::from_secs(65)).await;

    let status = monitor.monitoring_status().await;
    assert!(status.is_running);
    assert!(status.total_checks >= 2);
    assert_eq!(status.last_status, Some(HealthStatus::Healthy));
    assert!(!ctx.metrics().connection_pool_trends(60).is_empty());

    assert!(monitor.stop().await);
    assert!(!monitor.is_running().await);
    assert!(!monitor.stop().await);
}

#[tokio::test]
async fn test_monitor_resolves_connection_alerts_after_recovery() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    let manager = ctx.manager().await.unwrap();

    driver.fail_next_connects(1);
    assert!(manager.acquire_session().await.is_err());
    assert!(ctx.alerts().active_count() > 0);

    let status = ctx.monitor().tick().await.unwrap();
    assert_eq!(status, HealthStatus::Healthy);
    assert!(ctx
        .alerts()
        .active_alerts()
        .iter()
        .all(|a| a.alert_type != AlertType::ConnectionFailure));
}
