//! Alert Routes

use alerting::AlertAction;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use model::{ActiveAlertSummary, Alert, AlertFilter, AlertLevel, AlertStatus, DbId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::AppState;

/// Query parameters for alerts endpoint
#[derive(Debug, Deserialize)]
pub struct AlertQuery {
    pub station_id: Option<DbId>,
    pub status: Option<AlertStatus>,
    pub level: Option<AlertLevel>,
    /// Maximum number of records
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    AlertFilter::DEFAULT_LIMIT
}

impl From<AlertQuery> for AlertFilter {
    fn from(q: AlertQuery) -> Self {
        AlertFilter {
            station_id: q.station_id,
            status: q.status,
            level: q.level,
            limit: q.limit,
        }
    }
}

/// An alert as served, with its age at response time
#[derive(Debug, Serialize)]
pub struct AlertView {
    #[serde(flatten)]
    pub alert: Alert,
    /// Minutes since triggering; frozen once the alert is closed
    pub duration_minutes: i64,
}

impl AlertView {
    pub fn at(alert: Alert, now: DateTime<Utc>) -> Self {
        Self {
            duration_minutes: alert.duration_minutes(now),
            alert,
        }
    }
}

/// Response for alerts endpoint
#[derive(Debug, Serialize)]
pub struct AlertResponse {
    pub data: Vec<AlertView>,
    pub count: usize,
    pub active_count: usize,
}

/// Operator action request
#[derive(Debug, Deserialize)]
pub struct ActionRequest {
    pub action: String,
    pub notes: Option<String>,
    pub actor: Option<String>,
}

/// Result of an operator action
#[derive(Debug, Serialize)]
pub struct ActionResponse {
    pub alert: AlertView,
    /// False when the action had no effect on the alert
    pub applied: bool,
}

/// List alerts, newest first
pub async fn get_alerts(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertQuery>,
) -> ApiResult<Json<AlertResponse>> {
    let alerts = state.alerts.list(&params.into()).await?;
    let active = alerts.iter().filter(|a| a.is_active()).count();
    let now = Utc::now();

    Ok(Json(AlertResponse {
        count: alerts.len(),
        active_count: active,
        data: alerts.into_iter().map(|a| AlertView::at(a, now)).collect(),
    }))
}

/// Active alert counts per station and level
pub async fn active_summary(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<ActiveAlertSummary>>> {
    Ok(Json(state.alerts.active_summary().await?))
}

pub async fn get_alert(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DbId>,
) -> ApiResult<Json<AlertView>> {
    let alert = state.alerts.get(id).await?;
    Ok(Json(AlertView::at(alert, Utc::now())))
}

/// Acknowledge, resolve or dismiss an alert
pub async fn apply_action(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DbId>,
    body: Result<Json<ActionRequest>, JsonRejection>,
) -> ApiResult<Json<ActionResponse>> {
    let Json(body) = body?;
    let action: AlertAction = body
        .action
        .parse()
        .map_err(|e| ApiError::Alert(alerting::AlertError::from(e)))?;
    let actor = body.actor.as_deref().unwrap_or("system");

    let outcome = state
        .alerts
        .apply(id, action, actor, body.notes.as_deref())
        .await?;
    info!(alert_id = id, %action, actor, applied = outcome.is_applied(), "Alert action handled");

    Ok(Json(ActionResponse {
        applied: outcome.is_applied(),
        alert: AlertView::at(outcome.into_alert(), Utc::now()),
    }))
}
