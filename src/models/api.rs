use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Success envelope for API responses.
///
/// ```json
/// { "success": true, "data": { ... } }
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    /// Always `true` for this envelope
    pub success: bool,
    /// Response payload
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

/// Failure envelope for API responses.
///
/// `error` is always safe to show to clients. Internal details are logged
/// server-side and never copied here.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Always `false` for this envelope
    pub success: bool,
    /// Human-readable message
    pub error: String,
    /// Machine-readable error class (e.g. `validation_error`, `not_found`)
    pub code: String,
    /// Per-field messages for validation failures
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<String>>,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: error.into(),
            code: code.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = Some(details);
        self
    }
}

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Current timestamp
    pub timestamp: DateTime<Utc>,
    /// Service version
    pub version: String,
    /// Seconds since the service started
    pub uptime_seconds: u64,
    /// Result of the last background store ping
    pub store_connected: bool,
    /// MQTT connection state, absent when the MQTT intake is disabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mqtt_connected: Option<bool>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_response_envelope() {
        let value = serde_json::to_value(ApiResponse::ok(json!({"k": 1}))).unwrap();
        assert_eq!(value, json!({"success": true, "data": {"k": 1}}));
    }

    #[test]
    fn test_error_response_omits_empty_details() {
        let value =
            serde_json::to_value(ErrorResponse::new("not_found", "No readings found")).unwrap();

        assert_eq!(value["success"], false);
        assert_eq!(value["code"], "not_found");
        assert!(value.get("details").is_none());
    }

    #[test]
    fn test_error_response_with_details() {
        let response = ErrorResponse::new("validation_error", "bad input")
            .with_details(vec!["device_id is required".to_string()]);
        let value = serde_json::to_value(response).unwrap();

        assert_eq!(value["details"][0], "device_id is required");
    }

    #[test]
    fn test_health_response_without_mqtt() {
        let value = serde_json::to_value(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now(),
            version: "0.1.0".to_string(),
            uptime_seconds: 12,
            store_connected: true,
            mqtt_connected: None,
        })
        .unwrap();

        assert!(value.get("mqtt_connected").is_none());
        assert_eq!(value["status"], "healthy");
        assert_eq!(value["uptime_seconds"], 12);
    }
}
