use axum::{
    extract::{Path, Query, State},
    response::Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::database_api::{LimitParams, WindowParams};
use super::{ApiError, AppState};
use crate::monitoring::errors::ErrorSummary;
use crate::monitoring::metrics::Windowed;

#[derive(Debug, Default, Deserialize)]
pub struct ResolveRequest {
    #[serde(default)]
    pub note: Option<String>,
}

pub async fn error_summary(
    State(state): State<AppState>,
    Query(params): Query<WindowParams>,
) -> Json<Windowed<ErrorSummary>> {
    Json(state.ctx.errors().error_summary(params.minutes()))
}

pub async fn active_alerts(State(state): State<AppState>) -> Json<Value> {
    let alerts = state.ctx.alerts().active_alerts();
    let by_severity = state.ctx.alerts().active_counts_by_severity();
    Json(json!({
        "count": alerts.len(),
        "by_severity": by_severity,
        "alerts": alerts,
    }))
}

pub async fn alert_history(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> Json<Value> {
    let history = state.ctx.alerts().alert_history(params.limit());
    Json(json!({
        "count": history.len(),
        "history": history,
    }))
}

/// Resolve an active alert. The body is optional.
pub async fn resolve_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<String>,
    body: Option<Json<ResolveRequest>>,
) -> Result<Json<Value>, ApiError> {
    let note = body
        .and_then(|Json(request)| request.note)
        .unwrap_or_else(|| "resolved via API".to_string());

    if !state.ctx.alerts().resolve_alert(&alert_id, &note) {
        return Err(ApiError::NotFound(format!("No active alert with id {alert_id}")));
    }
    Ok(Json(json!({
        "resolved": true,
        "alert_id": alert_id,
        "note": note,
    })))
}
