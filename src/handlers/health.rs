//! Health and readiness endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Status with store and MQTT connection state
//! - `GET /ready` - Kubernetes-compatible readiness probe
//!
//! # Health vs Readiness
//!
//! - **Health** (`/health`): Returns 200 even if degraded, includes details
//! - **Readiness** (`/ready`): Returns 503 if not ready to serve traffic

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::instrument;

use crate::models::HealthResponse;
use crate::state::AppState;

/// Health check endpoint.
///
/// Reports the last background store ping and, when the MQTT intake is
/// enabled, its connection state. Always returns 200 OK.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "timestamp": "2024-01-15T10:30:00Z",
///   "version": "0.1.0",
///   "uptime_seconds": 3600,
///   "store_connected": true,
///   "mqtt_connected": true
/// }
/// ```
#[instrument(skip(state))]
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let store_connected = state.store_connected();
    let mqtt_connected = state.mqtt_connected();
    let healthy = store_connected && mqtt_connected.unwrap_or(true);

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        store_connected,
        mqtt_connected,
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// Pings the store on every call. Returns 503 if the ping fails or the MQTT
/// intake is enabled but not connected.
#[instrument(skip(state))]
pub async fn readiness_check(State(state): State<AppState>) -> Result<StatusCode, StatusCode> {
    let store_ok = state.check_store().await;
    let mqtt_ok = state.mqtt_connected().unwrap_or(true);

    if store_ok && mqtt_ok {
        Ok(StatusCode::OK)
    } else {
        Err(StatusCode::SERVICE_UNAVAILABLE)
    }
}
