//! MQTT intake adapter.
//!
//! Subscribes to a single-level wildcard topic (default
//! `iot/sensor/+/value`) and feeds each publish through the ingestion
//! service with the device id taken from the topic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  publish   ┌───────────────────────────┐
//! │ MQTT broker  │──────────► │ MqttIntake event loop     │
//! └──────────────┘            │  - ConnAck → (re)subscribe│
//!        ▲                    │  - Publish → handle_msg   │
//!        │ reconnect on poll  │  - Error → backoff        │
//!        └────────────────────┴─────────────┬─────────────┘
//!                                           ▼
//!                                 IngestionService::ingest
//! ```
//!
//! # Module Structure
//!
//! - `connection` - Connection state shared with health endpoints
//! - `backoff` - Exponential backoff with jitter between failed polls
//! - `topic` - Wildcard pattern parsing and device id extraction
//! - `subscriber` - The event loop and per-message handling

mod backoff;
mod connection;
mod subscriber;
mod topic;

use rumqttc::QoS;
use thiserror::Error;

use crate::services::IngestError;

pub use backoff::Backoff;
pub use connection::ConnectionState;
pub use subscriber::{MqttIntake, handle_message};
pub use topic::{TopicPattern, TopicPatternError};

/// Default MQTT port when the broker URL has none.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Capacity of the rumqttc request channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Invalid MQTT settings. Reported as configuration errors at startup.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MqttConfigError {
    #[error("Invalid MQTT broker URL '{0}': expected mqtt://host:port, tcp://host:port or host:port")]
    InvalidBrokerUrl(String),

    #[error("Invalid MQTT QoS {0}: expected 0, 1 or 2")]
    InvalidQos(u8),

    #[error(transparent)]
    InvalidTopic(#[from] TopicPatternError),
}

/// Why an inbound message was dropped.
#[derive(Error, Debug)]
pub enum MessageError {
    #[error("Topic '{0}' does not match the subscription pattern")]
    TopicMismatch(String),

    #[error("Payload is not valid JSON: {0}")]
    MalformedPayload(#[from] serde_json::Error),

    #[error("Payload must be a JSON object")]
    NotAnObject,

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

impl MessageError {
    /// Metrics label for the drop reason.
    pub fn reason(&self) -> &'static str {
        match self {
            MessageError::TopicMismatch(_) => "topic_mismatch",
            MessageError::MalformedPayload(_) => "malformed_payload",
            MessageError::NotAnObject => "not_an_object",
            MessageError::Ingest(IngestError::Validation(_)) => "validation",
            MessageError::Ingest(IngestError::Store(_)) => "store_error",
        }
    }
}

/// Parse a broker URL in the form `mqtt://host:port`, `tcp://host:port`,
/// `host:port` or `host` (default port 1883).
pub fn parse_broker_url(url: &str) -> Result<(String, u16), MqttConfigError> {
    let invalid = || MqttConfigError::InvalidBrokerUrl(url.to_string());

    let rest = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_MQTT_PORT),
    };

    if host.is_empty() || host.contains(['/', ':']) {
        return Err(invalid());
    }

    Ok((host.to_string(), port))
}

/// Map a numeric QoS level to the rumqttc type.
pub fn parse_qos(level: u8) -> Result<QoS, MqttConfigError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(MqttConfigError::InvalidQos(other)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url_with_scheme() {
        assert_eq!(
            parse_broker_url("mqtt://localhost:1883").unwrap(),
            ("localhost".to_string(), 1883)
        );
        assert_eq!(
            parse_broker_url("tcp://broker.example.com:8883").unwrap(),
            ("broker.example.com".to_string(), 8883)
        );
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        assert_eq!(
            parse_broker_url("mqtt://broker.local").unwrap(),
            ("broker.local".to_string(), DEFAULT_MQTT_PORT)
        );
        assert_eq!(
            parse_broker_url("10.0.0.5").unwrap(),
            ("10.0.0.5".to_string(), DEFAULT_MQTT_PORT)
        );
    }

    #[test]
    fn test_parse_broker_url_invalid() {
        assert!(parse_broker_url("mqtt://host:notaport").is_err());
        assert!(parse_broker_url("mqtt://:1883").is_err());
        assert!(parse_broker_url("http://host:1883").is_err());
        assert!(parse_broker_url("a:b:1883").is_err());
    }

    #[test]
    fn test_parse_qos() {
        assert_eq!(parse_qos(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(parse_qos(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(parse_qos(2).unwrap(), QoS::ExactlyOnce);
        assert_eq!(parse_qos(3), Err(MqttConfigError::InvalidQos(3)));
    }
}
