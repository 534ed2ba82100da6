//! Sensor reading endpoints.
//!
//! # Endpoints
//!
//! - `POST /api/sensor/ingest` - Validate and store one reading
//! - `GET /api/sensor/{device_id}/latest` - Most recent reading for a device

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use serde_json::Value;
use tracing::instrument;

use crate::error::AppResult;
use crate::models::{ApiResponse, IngestSource, StoredReading};
use crate::state::AppState;

/// Ingest a single reading.
///
/// The body is taken as an untyped JSON value so the validator can report
/// every field problem at once instead of failing on the first serde error.
///
/// # Request Body
///
/// ```json
/// {
///   "device_id": "s1",
///   "value": 23.5,
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
///
/// `timestamp` is optional (server time is used) and may also be epoch
/// milliseconds.
#[instrument(skip(state, payload))]
pub async fn ingest_reading(
    State(state): State<AppState>,
    payload: Result<Json<Value>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ApiResponse<StoredReading>>)> {
    let Json(raw) = payload?;

    let stored = state.ingestion.ingest(&raw, IngestSource::Rest).await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(stored))))
}

/// Latest reading for a device: greatest `timestamp`, ties going to the
/// most recently stored record.
#[instrument(skip(state))]
pub async fn get_latest(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
) -> AppResult<Json<ApiResponse<StoredReading>>> {
    let reading = state.retrieval.get_latest(&device_id).await?;
    Ok(Json(ApiResponse::ok(reading)))
}
