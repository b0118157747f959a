mod helpers;

use helpers::{context, ScriptedDriver};
use poolwatch::db::DriverErrorKind;
use poolwatch::monitoring::ChannelNotifier;
use poolwatch::{AlertSeverity, AlertType};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_repeated_connection_failures_raise_high_error_rate() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    let manager = ctx.manager().await.unwrap();
    driver.fail_next_connects(20);

    for _ in 0..20 {
        assert!(manager.acquire_session().await.is_err());
    }

    assert_eq!(ctx.errors().total_tracked(), 20);
    assert_eq!(ctx.pool_metrics().snapshot().failed_connections, 20);

    let active = ctx.alerts().active_alerts();
    let error_rate: Vec<_> = active
        .iter()
        .filter(|a| a.alert_type == AlertType::HighErrorRate)
        .collect();
    assert!(!error_rate.is_empty());
    assert!(error_rate.iter().all(|a| a.severity == AlertSeverity::High));

    // Cooldowns keep one alert per key despite twenty triggers.
    let connection_failures = active
        .iter()
        .filter(|a| a.alert_type == AlertType::ConnectionFailure)
        .count();
    assert_eq!(connection_failures, 1);
    assert_eq!(
        active
            .iter()
            .filter(|a| a.alert_type == AlertType::PerformanceDegradation)
            .count(),
        1
    );
}

#[tokio::test]
async fn test_error_rate_uses_recorded_queries_as_denominator() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);

    for _ in 0..19 {
        ctx.execute_with_retry("SELECT 1").await.unwrap();
    }
    driver.fail_next_statements(1, DriverErrorKind::SyntaxError);
    assert!(ctx.execute_with_retry("SELEC 1").await.is_err());

    // One failure among twenty recorded statements.
    approx::assert_relative_eq!(ctx.errors().error_rate(5), 0.05);
    assert!(ctx
        .alerts()
        .active_alerts()
        .iter()
        .all(|a| a.alert_type != AlertType::ConnectionFailure));
}

#[tokio::test]
async fn test_deadlock_alert_reaches_notification_channel() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    let (notifier, mut receiver) = ChannelNotifier::channel(16);
    ctx.alerts().add_notification_handler(Arc::new(notifier));

    driver.fail_next_statements(1, DriverErrorKind::Deadlock);
    let manager = ctx.manager().await.unwrap();
    let mut session = manager.acquire_session().await.unwrap();
    assert!(session.execute("UPDATE accounts SET balance = 0").await.is_err());
    drop(session);

    let mut delivered = Vec::new();
    while let Ok(Some(alert)) = tokio::time::timeout(Duration::from_millis(200), receiver.recv()).await {
        delivered.push(alert);
    }
    let deadlock = delivered
        .iter()
        .find(|a| a.alert_type == AlertType::Deadlock)
        .expect("deadlock alert");
    assert_eq!(deadlock.severity, AlertSeverity::High);
    assert_eq!(deadlock.metadata["table_name"], "accounts");
}

#[tokio::test]
async fn test_recovered_error_rate_alerts_resolve() {
    let driver = ScriptedDriver::new();
    let ctx = context(&driver);
    let manager = ctx.manager().await.unwrap();

    driver.fail_next_connects(1);
    assert!(manager.acquire_session().await.is_err());
    assert!(ctx
        .alerts()
        .active_alerts()
        .iter()
        .any(|a| a.alert_type == AlertType::HighErrorRate));

    // Enough successful statements to bring every window back under its threshold.
    for _ in 0..60 {
        ctx.execute_with_retry("SELECT 1").await.unwrap();
    }
    assert!(ctx.errors().evaluate_recovery() > 0);
    assert!(ctx
        .alerts()
        .active_alerts()
        .iter()
        .all(|a| a.alert_type != AlertType::HighErrorRate));
}
