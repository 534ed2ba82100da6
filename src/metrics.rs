//! Prometheus metrics for application observability.
//!
//! Metrics are exposed on a dedicated HTTP listener (`METRICS_PORT`,
//! default 9090). Recording functions are no-ops until [`init_metrics`]
//! installs the exporter, so services and tests call them unconditionally.
//!
//! # Available Metrics
//!
//! ## Counters
//! - `sensor_readings_ingested_total` - Ingest attempts (labels: source, outcome)
//! - `sensor_latest_lookups_total` - Latest-reading lookups (labels: outcome)
//! - `sensor_mqtt_messages_dropped_total` - MQTT messages dropped (labels: reason)
//! - `sensor_mqtt_reconnects_total` - MQTT reconnection attempts
//!
//! ## Histograms
//! - `sensor_ingest_duration_seconds` - Validate + persist duration (labels: source)
//!
//! ## Gauges
//! - `sensor_mqtt_connection_status` - 1 = connected, 0 = disconnected
//! - `sensor_store_connection_status` - 1 = last ping succeeded, 0 = failed

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{error, info};

/// Metric names as constants for consistency.
pub mod names {
    pub const READINGS_INGESTED_TOTAL: &str = "sensor_readings_ingested_total";
    pub const LATEST_LOOKUPS_TOTAL: &str = "sensor_latest_lookups_total";
    pub const MQTT_MESSAGES_DROPPED_TOTAL: &str = "sensor_mqtt_messages_dropped_total";
    pub const MQTT_RECONNECTS_TOTAL: &str = "sensor_mqtt_reconnects_total";
    pub const INGEST_DURATION_SECONDS: &str = "sensor_ingest_duration_seconds";
    pub const MQTT_CONNECTION_STATUS: &str = "sensor_mqtt_connection_status";
    pub const STORE_CONNECTION_STATUS: &str = "sensor_store_connection_status";
}

/// Install the Prometheus exporter and describe all metrics.
///
/// # Errors
///
/// Returns a message if the exporter cannot be installed (e.g. the port is
/// taken or a recorder is already set).
pub fn init_metrics(metrics_addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        names::READINGS_INGESTED_TOTAL,
        "Readings submitted for ingestion, by intake source and outcome"
    );
    describe_counter!(
        names::LATEST_LOOKUPS_TOTAL,
        "Latest-reading lookups, by outcome"
    );
    describe_counter!(
        names::MQTT_MESSAGES_DROPPED_TOTAL,
        "MQTT messages dropped without persisting, by reason"
    );
    describe_counter!(
        names::MQTT_RECONNECTS_TOTAL,
        "MQTT reconnection attempts after a connection error"
    );
    describe_histogram!(
        names::INGEST_DURATION_SECONDS,
        "Validate and persist duration in seconds"
    );
    describe_gauge!(
        names::MQTT_CONNECTION_STATUS,
        "MQTT connection status (1 = connected, 0 = disconnected)"
    );
    describe_gauge!(
        names::STORE_CONNECTION_STATUS,
        "Reading store status from the last ping (1 = ok, 0 = failed)"
    );

    info!(addr = %metrics_addr, "Prometheus metrics endpoint started");
    Ok(())
}

/// Try to initialize metrics, logging any errors but not failing.
pub fn try_init_metrics(metrics_addr: SocketAddr) {
    if let Err(e) = init_metrics(metrics_addr) {
        error!(error = %e, "Failed to initialize metrics, continuing without metrics");
    }
}

// =============================================================================
// Counters
// =============================================================================

/// Record an ingest attempt. `outcome` is `accepted`, `invalid` or `store_error`.
pub fn record_reading_ingested(source: &'static str, outcome: &'static str) {
    counter!(names::READINGS_INGESTED_TOTAL, "source" => source, "outcome" => outcome)
        .increment(1);
}

/// Record a latest lookup. `outcome` is `found`, `not_found` or `error`.
pub fn record_latest_lookup(outcome: &'static str) {
    counter!(names::LATEST_LOOKUPS_TOTAL, "outcome" => outcome).increment(1);
}

/// Record a dropped MQTT message.
pub fn record_mqtt_message_dropped(reason: &'static str) {
    counter!(names::MQTT_MESSAGES_DROPPED_TOTAL, "reason" => reason).increment(1);
}

/// Record an MQTT reconnection attempt.
pub fn record_mqtt_reconnect() {
    counter!(names::MQTT_RECONNECTS_TOTAL).increment(1);
}

// =============================================================================
// Histograms
// =============================================================================

pub fn record_ingest_duration(source: &'static str, duration_secs: f64) {
    histogram!(names::INGEST_DURATION_SECONDS, "source" => source).record(duration_secs);
}

// =============================================================================
// Gauges
// =============================================================================

pub fn set_mqtt_connection_status(connected: bool) {
    gauge!(names::MQTT_CONNECTION_STATUS).set(if connected { 1.0 } else { 0.0 });
}

pub fn set_store_connection_status(connected: bool) {
    gauge!(names::STORE_CONNECTION_STATUS).set(if connected { 1.0 } else { 0.0 });
}
