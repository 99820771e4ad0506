//! Threshold Routes

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use model::{DbId, NewThreshold, Threshold, ThresholdUpdate};
use serde::Deserialize;
use std::sync::Arc;

use crate::error::ApiResult;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ThresholdQuery {
    pub station_id: Option<DbId>,
}

/// Who is making a change; defaults to `system`
#[derive(Debug, Deserialize)]
pub struct ActorQuery {
    pub actor: Option<String>,
}

impl ActorQuery {
    fn name(&self) -> &str {
        self.actor.as_deref().unwrap_or("system")
    }
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ThresholdQuery>,
) -> ApiResult<Json<Vec<Threshold>>> {
    Ok(Json(state.registry.list(params.station_id).await?))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DbId>,
) -> ApiResult<Json<Threshold>> {
    Ok(Json(state.registry.get(id).await?))
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    Query(actor): Query<ActorQuery>,
    Json(body): Json<NewThreshold>,
) -> ApiResult<(StatusCode, Json<Threshold>)> {
    let threshold = state.registry.create(body, actor.name()).await?;
    Ok((StatusCode::CREATED, Json(threshold)))
}

/// Replace bounds, unit, notes and the active flag
pub async fn update(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DbId>,
    Query(actor): Query<ActorQuery>,
    Json(body): Json<ThresholdUpdate>,
) -> ApiResult<Json<Threshold>> {
    Ok(Json(state.registry.update(id, body, actor.name()).await?))
}
