use std::sync::Arc;

use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS, SubscribeReasonCode};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, Span, debug, error, info, info_span, instrument, warn};

use super::{
    Backoff, ConnectionState, EVENT_CHANNEL_CAPACITY, MessageError, MqttConfigError, TopicPattern,
    parse_broker_url, parse_qos,
};
use crate::config::Config;
use crate::metrics;
use crate::models::{IngestSource, StoredReading};
use crate::services::{IngestError, IngestionService};
use crate::validation::FIELD_DEVICE_ID;

/// Long-running MQTT subscriber feeding the ingestion service.
///
/// Uses a clean session, so the subscription is re-issued on every ConnAck.
/// Messages are handled one at a time in arrival order.
pub struct MqttIntake {
    options: MqttOptions,
    pattern: TopicPattern,
    qos: QoS,
    backoff: Backoff,
    ingestion: IngestionService,
    state: Arc<ConnectionState>,
}

impl MqttIntake {
    /// Build the subscriber from application configuration.
    ///
    /// # Errors
    ///
    /// Returns [`MqttConfigError`] for a malformed broker URL, topic pattern
    /// or QoS level.
    pub fn from_config(
        config: &Config,
        ingestion: IngestionService,
        state: Arc<ConnectionState>,
    ) -> Result<Self, MqttConfigError> {
        let (host, port) = parse_broker_url(&config.mqtt_broker_url)?;
        let pattern = TopicPattern::parse(&config.mqtt_topic)?;
        let qos = parse_qos(config.mqtt_qos)?;

        let mut options = MqttOptions::new(&config.mqtt_client_id, host, port);
        options.set_keep_alive(config.mqtt_keep_alive);
        options.set_clean_session(true);
        if let Some(username) = &config.mqtt_username {
            options.set_credentials(
                username,
                config.mqtt_password.as_deref().unwrap_or_default(),
            );
        }

        Ok(Self {
            options,
            pattern,
            qos,
            backoff: Backoff::new(config.reconnect_base_delay, config.reconnect_max_delay),
            ingestion,
            state,
        })
    }

    pub fn pattern(&self) -> &TopicPattern {
        &self.pattern
    }

    /// Run the event loop until `cancel` fires.
    ///
    /// Connection errors never end the loop: rumqttc reconnects on the next
    /// poll, and the loop waits with exponential backoff in between.
    #[instrument(
        name = "mqtt_intake",
        skip_all,
        fields(topic = %self.pattern, client_id = %self.options.client_id())
    )]
    pub async fn run(self, cancel: CancellationToken) {
        let (host, port) = self.options.broker_address();
        info!(broker = %format!("{host}:{port}"), "Starting MQTT intake");

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), EVENT_CHANNEL_CAPACITY);

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    debug!("Shutdown signal received");
                    let _ = client.disconnect().await;
                    break;
                }
                event = eventloop.poll() => match event {
                    Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                        self.state.mark_connected();
                        metrics::set_mqtt_connection_status(true);
                        info!(code = ?ack.code, "Connected to MQTT broker");

                        if let Err(e) = client.try_subscribe(self.pattern.as_str(), self.qos) {
                            error!(error = %e, "Failed to queue MQTT subscription");
                        }
                    }
                    Ok(Event::Incoming(Packet::SubAck(ack))) => {
                        let granted = ack
                            .return_codes
                            .iter()
                            .all(|code| !matches!(code, SubscribeReasonCode::Failure));
                        self.state.set_subscribed(granted);
                        if granted {
                            info!(codes = ?ack.return_codes, "Subscription acknowledged");
                        } else {
                            error!("Broker refused the subscription");
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        // Outcome is already logged and counted inside
                        let _ = handle_message(
                            &self.ingestion,
                            &self.pattern,
                            &publish.topic,
                            &publish.payload,
                        )
                        .await;
                    }
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        self.state.mark_disconnected();
                        metrics::set_mqtt_connection_status(false);
                        warn!("Broker sent DISCONNECT");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let attempt = self.state.mark_failed();
                        metrics::set_mqtt_connection_status(false);
                        metrics::record_mqtt_reconnect();

                        let delay = self.backoff.delay(attempt);
                        warn!(
                            error = %e,
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "MQTT connection error, reconnecting"
                        );

                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        self.state.mark_disconnected();
        metrics::set_mqtt_connection_status(false);
        info!("MQTT intake stopped");
    }
}

/// Handle one inbound publish.
///
/// The device id comes from the topic and overrides any `device_id` in the
/// payload. Every failure is logged and counted as a drop; the caller only
/// needs the result for testing.
pub async fn handle_message(
    ingestion: &IngestionService,
    pattern: &TopicPattern,
    topic: &str,
    payload: &[u8],
) -> Result<StoredReading, MessageError> {
    // Root span per message so each one is its own trace
    let span = info_span!(
        parent: Span::none(),
        "mqtt_message",
        topic = %topic,
        payload_size = payload.len(),
        device_id = tracing::field::Empty,
    );

    async {
        let result = ingest_message(ingestion, pattern, topic, payload).await;
        match &result {
            Ok(stored) => debug!(id = %stored.id, "MQTT reading stored"),
            Err(e @ MessageError::Ingest(IngestError::Store(_))) => {
                metrics::record_mqtt_message_dropped(e.reason());
                error!(error = %e, "Dropping MQTT message, store failed");
            }
            Err(e) => {
                metrics::record_mqtt_message_dropped(e.reason());
                warn!(reason = e.reason(), error = %e, "Dropping MQTT message");
            }
        }
        result
    }
    .instrument(span)
    .await
}

async fn ingest_message(
    ingestion: &IngestionService,
    pattern: &TopicPattern,
    topic: &str,
    payload: &[u8],
) -> Result<StoredReading, MessageError> {
    let device_id = pattern
        .extract_device_id(topic)
        .ok_or_else(|| MessageError::TopicMismatch(topic.to_string()))?;
    Span::current().record("device_id", device_id);

    let mut fields = match serde_json::from_slice::<Value>(payload)? {
        Value::Object(fields) => fields,
        _ => return Err(MessageError::NotAnObject),
    };
    fields.insert(
        FIELD_DEVICE_ID.to_string(),
        Value::String(device_id.to_string()),
    );

    Ok(ingestion
        .ingest(&Value::Object(fields), IngestSource::Mqtt)
        .await?)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryReadingStore, MockReadingStore, ReadingStore, StoreError};
    use crate::validation::{ReadingValidator, ValueBounds};

    const NOW: i64 = 1_705_315_800_000;

    fn setup() -> (IngestionService, Arc<InMemoryReadingStore>, TopicPattern) {
        let clock = Arc::new(ManualClock::from_millis(NOW));
        let store = Arc::new(InMemoryReadingStore::new(clock.clone()));
        let validator = ReadingValidator::new(Some(ValueBounds::default()), clock);
        (
            IngestionService::new(validator, store.clone()),
            store,
            TopicPattern::parse("iot/sensor/+/value").unwrap(),
        )
    }

    #[tokio::test]
    async fn test_device_id_from_topic() {
        let (ingestion, store, pattern) = setup();

        let stored = handle_message(
            &ingestion,
            &pattern,
            "iot/sensor/s2/value",
            br#"{"value": 19.1}"#,
        )
        .await
        .unwrap();

        assert_eq!(stored.device_id, "s2");
        assert_eq!(stored.value, 19.1);
        assert_eq!(stored.timestamp, NOW);
        assert_eq!(store.device_len("s2").await, 1);
    }

    #[tokio::test]
    async fn test_topic_overrides_payload_device_id() {
        let (ingestion, store, pattern) = setup();

        let stored = handle_message(
            &ingestion,
            &pattern,
            "iot/sensor/s3/value",
            br#"{"device_id": "spoofed", "value": 1.5, "timestamp": 100}"#,
        )
        .await
        .unwrap();

        assert_eq!(stored.device_id, "s3");
        assert_eq!(stored.timestamp, 100);
        assert_eq!(store.device_len("spoofed").await, 0);
    }

    #[tokio::test]
    async fn test_topic_mismatch_dropped() {
        let (ingestion, store, pattern) = setup();

        let err = handle_message(
            &ingestion,
            &pattern,
            "iot/sensor/s2/extra/value",
            br#"{"value": 1.0}"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MessageError::TopicMismatch(_)));
        assert_eq!(err.reason(), "topic_mismatch");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_malformed_payload_dropped() {
        let (ingestion, store, pattern) = setup();

        let err = handle_message(&ingestion, &pattern, "iot/sensor/s2/value", b"{not json")
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "malformed_payload");

        let err = handle_message(&ingestion, &pattern, "iot/sensor/s2/value", b"[1, 2]")
            .await
            .unwrap_err();
        assert!(matches!(err, MessageError::NotAnObject));

        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_invalid_reading_dropped() {
        let (ingestion, store, pattern) = setup();

        let err = handle_message(
            &ingestion,
            &pattern,
            "iot/sensor/s2/value",
            br#"{"value": "warm"}"#,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, MessageError::Ingest(IngestError::Validation(_))));
        assert_eq!(err.reason(), "validation");
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_failure_dropped() {
        let mut store = MockReadingStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("down".to_string())));
        let validator = ReadingValidator::new(None, Arc::new(ManualClock::from_millis(NOW)));
        let ingestion = IngestionService::new(validator, Arc::new(store));
        let pattern = TopicPattern::parse("iot/sensor/+/value").unwrap();

        let err = handle_message(
            &ingestion,
            &pattern,
            "iot/sensor/s2/value",
            br#"{"value": 1.0}"#,
        )
        .await
        .unwrap_err();

        assert_eq!(err.reason(), "store_error");
    }

    #[tokio::test]
    async fn test_messages_applied_in_order() {
        let (ingestion, store, pattern) = setup();

        for (value, ts) in [(1.0, 10), (2.0, 30), (3.0, 20)] {
            let payload = serde_json::to_vec(&serde_json::json!({
                "value": value,
                "timestamp": ts
            }))
            .unwrap();
            handle_message(&ingestion, &pattern, "iot/sensor/s9/value", &payload)
                .await
                .unwrap();
        }

        let latest = store.latest("s9").await.unwrap().unwrap();
        assert_eq!(latest.value, 2.0);
        assert_eq!(latest.timestamp, 30);
    }

    #[test]
    fn test_from_config_rejects_bad_settings() {
        let (ingestion, _, _) = setup();
        let state = Arc::new(ConnectionState::new());

        let config = Config {
            mqtt_topic: "iot/sensor/#".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            MqttIntake::from_config(&config, ingestion.clone(), state.clone()),
            Err(MqttConfigError::InvalidTopic(_))
        ));

        let config = Config {
            mqtt_qos: 7,
            ..Config::default()
        };
        assert!(matches!(
            MqttIntake::from_config(&config, ingestion, state),
            Err(MqttConfigError::InvalidQos(7))
        ));
    }

    #[test]
    fn test_from_config_defaults() {
        let (ingestion, _, _) = setup();
        let intake = MqttIntake::from_config(
            &Config::default(),
            ingestion,
            Arc::new(ConnectionState::new()),
        )
        .unwrap();

        assert_eq!(intake.pattern().as_str(), "iot/sensor/+/value");
        assert_eq!(intake.qos, QoS::AtLeastOnce);
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let (ingestion, _, _) = setup();
        let state = Arc::new(ConnectionState::new());
        let config = Config {
            // Nothing listens here; the loop keeps backing off until cancelled
            mqtt_broker_url: "mqtt://127.0.0.1:1".to_string(),
            ..Config::default()
        };
        let intake = MqttIntake::from_config(&config, ingestion, state.clone()).unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(intake.run(cancel.clone()));

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("intake did not stop")
            .unwrap();
        assert!(!state.is_connected());
    }
}
