pub mod alerts_api;
pub mod database_api;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::context::ObservabilityContext;
use crate::error::DatabaseError;
use crate::resilience::Classify;

/// Application state for the ops API
#[derive(Clone)]
pub struct AppState {
    pub ctx: Arc<ObservabilityContext>,
}

impl AppState {
    pub fn new(ctx: Arc<ObservabilityContext>) -> Self {
        Self { ctx }
    }
}

/// Create the ops API router
pub fn create_api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/database", get(database_api::database_health))
        .route("/health/database/detailed", get(database_api::detailed_health))
        .route("/health/database/pool", get(database_api::pool_status))
        // Metrics
        .route("/health/database/metrics", get(database_api::comprehensive_metrics))
        .route("/health/database/metrics/queries", get(database_api::query_metrics))
        .route("/health/database/metrics/pool-trends", get(database_api::pool_trends))
        .route("/health/database/metrics/errors", get(database_api::query_errors))
        .route("/health/database/metrics/slow-queries", get(database_api::slow_queries))
        .route("/health/database/metrics/reset", post(database_api::reset_metrics))
        // Monitoring
        .route("/health/database/monitoring", get(database_api::monitoring_status))
        .route("/health/database/monitoring/history", get(database_api::monitoring_history))
        .route("/health/database/monitoring/start", post(database_api::start_monitoring))
        .route("/health/database/monitoring/stop", post(database_api::stop_monitoring))
        // Errors and alerts
        .route("/health/database/errors", get(alerts_api::error_summary))
        .route("/health/database/alerts", get(alerts_api::active_alerts))
        .route("/health/database/alerts/history", get(alerts_api::alert_history))
        .route("/health/database/alerts/:id/resolve", post(alerts_api::resolve_alert))
        .route("/metrics", get(prometheus_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Liveness endpoint; never touches the database.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "poolwatch",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn prometheus_metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let manager = state.ctx.manager().await?;
    let body = state.ctx.exporter().gather(&manager)?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// Handler error rendered as a JSON body with a classified status code.
#[derive(Debug)]
pub enum ApiError {
    Database(DatabaseError),
    NotFound(String),
}

impl From<DatabaseError> for ApiError {
    fn from(err: DatabaseError) -> Self {
        ApiError::Database(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Database(err) => {
                let classification = err.classification();
                let status = StatusCode::from_u16(classification.status_code)
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                error!("Request failed: {} ({})", err, classification.detail);
                (
                    status,
                    Json(json!({
                        "error": classification.detail,
                        "category": classification.category,
                        "retryable": classification.retryable,
                    })),
                )
                    .into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
        }
    }
}
