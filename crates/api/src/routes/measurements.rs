//! Measurement Routes

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    Json,
};
use ingestion::{decode_measurement, BatchReport, Ingested};
use model::{DbId, Measurement};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use storage::MeasurementStore;

use crate::error::ApiResult;
use crate::AppState;

/// Query parameters for the measurement listing
#[derive(Debug, Deserialize)]
pub struct MeasurementQuery {
    pub station_id: DbId,
    /// Maximum number of records to return
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// Response for the measurement listing
#[derive(Debug, Serialize)]
pub struct MeasurementResponse {
    pub data: Vec<Measurement>,
    pub meta: MeasurementMeta,
}

#[derive(Debug, Serialize)]
pub struct MeasurementMeta {
    pub count: usize,
    pub limit: usize,
}

/// Latest measurements of a station, newest first
pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<MeasurementQuery>,
) -> ApiResult<Json<MeasurementResponse>> {
    let limit = params.limit.clamp(1, 1000);
    let data = state.store.list_measurements(params.station_id, limit).await?;

    Ok(Json(MeasurementResponse {
        meta: MeasurementMeta {
            count: data.len(),
            limit,
        },
        data,
    }))
}

/// Batch submission body. Items stay raw so one malformed item is reported
/// at its index instead of failing the whole request.
#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub measurements: Vec<Value>,
}

/// Ingest one measurement
pub async fn create(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Ingested>)> {
    let Json(body) = body?;
    let ingested = state
        .coordinator
        .ingest_entry(decode_measurement(body))
        .await?;
    Ok((StatusCode::CREATED, Json(ingested)))
}

/// Ingest a list of measurements, item by item
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchReport>> {
    let Json(body) = body?;
    let entries = body
        .measurements
        .into_iter()
        .map(decode_measurement)
        .collect();
    Ok(Json(state.coordinator.ingest_entries(entries).await?))
}

/// Re-run alert evaluation for a stored measurement
pub async fn evaluate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DbId>,
) -> ApiResult<Json<Ingested>> {
    Ok(Json(state.coordinator.reevaluate(id).await?))
}
