use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use poolwatch::api::{create_api_router, AppState};
use poolwatch::{Config, HealthStatus, ObservabilityContext, PgDriver};
use std::future::Future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "poolwatch")]
#[command(about = "Connection-pool health checks, metrics and alerting for PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the ops API and run the background monitor
    Serve {
        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,
        /// Override the configured bind port
        #[arg(long)]
        port: Option<u16>,
        /// Do not start the background monitor
        #[arg(long)]
        no_monitor: bool,
    },
    /// Run one health check with recovery and print it as JSON
    Check {
        /// Treat a degraded result as a failure
        #[arg(long)]
        strict: bool,
    },
    /// Print the configuration report
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::from_env()?;
    init_tracing(&config);

    match cli.command {
        Some(Commands::Serve { host, port, no_monitor }) => serve(config, host, port, no_monitor).await,
        Some(Commands::Check { strict }) => check(config, strict).await,
        Some(Commands::Config) => {
            println!("{}", config.create_diagnostic_report());
            match config.validate() {
                Ok(()) => println!("✅ Configuration is valid"),
                Err(e) => {
                    println!("❌ Configuration is invalid: {e}");
                    std::process::exit(1);
                }
            }
            Ok(())
        }
        None => serve(config, None, None, false).await,
    }
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.operational.log_level.as_str().into());
    let registry = tracing_subscriber::registry().with(filter);
    if config.operational.log_format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn build_context(config: Config) -> Result<Arc<ObservabilityContext>> {
    config.validate()?;
    let driver = PgDriver::new(
        &config.database_url,
        &config.application_name,
        config.pool.statement_timeout(),
    )?;
    info!("Database: {}", config.safe_database_url());
    Ok(ObservabilityContext::new(config, Arc::new(driver))?)
}

async fn serve(config: Config, host: Option<String>, port: Option<u16>, no_monitor: bool) -> Result<()> {
    let host = host.unwrap_or_else(|| config.operational.http_host.clone());
    let port = port.unwrap_or(config.operational.http_port);
    let monitoring_enabled = config.operational.monitoring_enabled && !no_monitor;

    let ctx = build_context(config)?;
    if monitoring_enabled {
        ctx.monitor().start().await;
    } else {
        warn!("Background monitoring is disabled");
    }

    let app = create_api_router(AppState::new(ctx.clone()));
    let addr = format!("{}:{}", host, port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("🚀 poolwatch listening on http://{}", addr);
    info!("🩺 Database health at http://{}/health/database", addr);
    info!("📊 Prometheus metrics at http://{}/metrics", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    ctx.shutdown().await;
    info!("🎉 Graceful shutdown completed");
    Ok(())
}

async fn check(config: Config, strict: bool) -> Result<()> {
    let ctx = build_context(config)?;
    let manager = ctx.manager().await?;
    let result = manager.health_check_with_recovery().await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    ctx.shutdown().await;

    let passed = match result.status {
        HealthStatus::Healthy => true,
        HealthStatus::Degraded => !strict,
        HealthStatus::Unhealthy | HealthStatus::Error => false,
    };
    if !passed {
        error!("❌ Database health check failed: {}", result.status);
        std::process::exit(1);
    }
    info!("✅ Database health check passed: {}", result.status);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = until_signal(
        signal::unix::signal(signal::unix::SignalKind::terminate()),
        "terminate signal",
        |mut stream| async move {
            stream.recv().await;
        },
    );

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}

/// Wait on an installed signal handler. A handler that failed to install never fires, so
/// the server keeps running on the remaining signals.
async fn until_signal<H, F, Fut>(handler: std::io::Result<H>, name: &str, wait: F)
where
    F: FnOnce(H) -> Fut,
    Fut: Future<Output = ()>,
{
    match handler {
        Ok(handler) => wait(handler).await,
        Err(e) => {
            error!("Failed to install {} handler: {}", name, e);
            std::future::pending::<()>().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_failed_handler_install_never_fires() {
        let failed = until_signal(
            Err::<(), _>(std::io::Error::other("signal handling unavailable")),
            "terminate signal",
            |()| async {},
        );
        assert!(timeout(Duration::from_millis(50), failed).await.is_err());
    }

    #[tokio::test]
    async fn test_installed_handler_fires() {
        let installed = until_signal(Ok(()), "terminate signal", |()| async {});
        assert!(timeout(Duration::from_millis(50), installed).await.is_ok());
    }
}
