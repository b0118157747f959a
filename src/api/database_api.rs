use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{ApiError, AppState};
use crate::db::manager::DetailedPoolInfo;
use crate::monitoring::health::HealthCheckResult;
use crate::monitoring::metrics::{
    ComprehensiveMetrics, PoolTrends, QueryErrorAnalysis, QueryPerformanceStats, SlowQueryAnalysis,
    Windowed,
};
use crate::monitoring::monitor::{ComprehensiveStatus, MonitoringStatus};
use crate::monitoring::HealthStatus;

const DEFAULT_WINDOW_MINUTES: u64 = 60;
/// One week.
const MAX_WINDOW_MINUTES: u64 = 10_080;
const DEFAULT_HISTORY_LIMIT: usize = 10;

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    pub window_minutes: Option<u64>,
}

impl WindowParams {
    pub fn minutes(&self) -> u64 {
        self.window_minutes
            .unwrap_or(DEFAULT_WINDOW_MINUTES)
            .clamp(1, MAX_WINDOW_MINUTES)
    }
}

#[derive(Debug, Deserialize)]
pub struct LimitParams {
    pub limit: Option<usize>,
}

impl LimitParams {
    pub fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_HISTORY_LIMIT)
    }
}

/// Run a health check with recovery. Unhealthy and error results answer 503.
pub async fn database_health(
    State(state): State<AppState>,
) -> Result<(StatusCode, Json<HealthCheckResult>), ApiError> {
    let manager = state.ctx.manager().await?;
    let result = manager.health_check_with_recovery().await;
    let code = match result.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy | HealthStatus::Error => StatusCode::SERVICE_UNAVAILABLE,
    };
    Ok((code, Json(result)))
}

pub async fn detailed_health(State(state): State<AppState>) -> Json<ComprehensiveStatus> {
    Json(state.ctx.monitor().comprehensive_status().await)
}

pub async fn pool_status(State(state): State<AppState>) -> Result<Json<DetailedPoolInfo>, ApiError> {
    let manager = state.ctx.manager().await?;
    Ok(Json(manager.detailed_pool_info()?))
}

pub async fn comprehensive_metrics(State(state): State<AppState>) -> Json<ComprehensiveMetrics> {
    Json(state.ctx.metrics().comprehensive_metrics())
}

pub async fn query_metrics(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Json<Windowed<QueryPerformanceStats>> {
    Json(state.ctx.metrics().query_performance_stats(params.minutes()))
}

pub async fn pool_trends(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Json<Windowed<PoolTrends>> {
    Json(state.ctx.metrics().connection_pool_trends(params.minutes()))
}

pub async fn query_errors(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Json<Windowed<QueryErrorAnalysis>> {
    Json(state.ctx.metrics().error_analysis(params.minutes()))
}

pub async fn slow_queries(State(state): State<AppState>) -> Json<Windowed<SlowQueryAnalysis>> {
    Json(state.ctx.metrics().slow_query_analysis())
}

pub async fn reset_metrics(State(state): State<AppState>) -> Json<Value> {
    state.ctx.reset_metrics();
    info!("Metrics reset via API");
    Json(json!({ "status": "reset" }))
}

pub async fn monitoring_status(State(state): State<AppState>) -> Json<MonitoringStatus> {
    Json(state.ctx.monitor().monitoring_status().await)
}

pub async fn monitoring_history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    let history = state.ctx.monitor().health_history(params.limit());
    Json(json!({
        "count": history.len(),
        "history": history,
    }))
}

pub async fn start_monitoring(State(state): State<AppState>) -> Json<Value> {
    let started = state.ctx.monitor().start().await;
    Json(json!({
        "started": started,
        "is_running": state.ctx.monitor().is_running().await,
    }))
}

pub async fn stop_monitoring(State(state): State<AppState>) -> Json<Value> {
    let stopped = state.ctx.monitor().stop().await;
    Json(json!({
        "stopped": stopped,
        "is_running": state.ctx.monitor().is_running().await,
    }))
}
