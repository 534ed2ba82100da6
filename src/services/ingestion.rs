//! Ingestion service: the single write path shared by REST and MQTT intake.
//!
//! Both adapters hand a raw JSON field bag to [`IngestionService::ingest`],
//! so validation and persistence semantics are identical regardless of
//! origin.

use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::metrics;
use crate::models::{IngestSource, StoredReading};
use crate::store::{ReadingStore, StoreError};
use crate::validation::{ReadingValidator, ValidationError};

/// Failure of a single ingest call.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates and persists readings.
///
/// Thread-safe and clonable for use across async tasks. Outcomes are
/// counted in `sensor_readings_ingested_total`.
#[derive(Clone)]
pub struct IngestionService {
    validator: ReadingValidator,
    store: Arc<dyn ReadingStore>,
}

impl IngestionService {
    pub fn new(validator: ReadingValidator, store: Arc<dyn ReadingStore>) -> Self {
        Self { validator, store }
    }

    /// Validate `raw` and persist the resulting reading.
    ///
    /// Validation errors are returned unchanged; nothing is written for them.
    #[instrument(skip(self, raw), fields(source = %source))]
    pub async fn ingest(
        &self,
        raw: &Value,
        source: IngestSource,
    ) -> Result<StoredReading, IngestError> {
        let started = Instant::now();

        let reading = match self.validator.validate(raw) {
            Ok(reading) => reading,
            Err(e) => {
                metrics::record_reading_ingested(source.as_str(), "invalid");
                debug!(error = %e, "Reading rejected by validation");
                return Err(e.into());
            }
        };

        let device_id = reading.device_id.clone();
        let stored = match self.store.insert(reading).await {
            Ok(stored) => stored,
            Err(e) => {
                metrics::record_reading_ingested(source.as_str(), "store_error");
                warn!(device_id = %device_id, error = %e, "Failed to persist reading");
                return Err(e.into());
            }
        };

        metrics::record_reading_ingested(source.as_str(), "accepted");
        metrics::record_ingest_duration(source.as_str(), started.elapsed().as_secs_f64());
        debug!(
            id = %stored.id,
            device_id = %stored.device_id,
            timestamp = stored.timestamp,
            "Reading ingested"
        );

        Ok(stored)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{InMemoryReadingStore, MockReadingStore};
    use crate::validation::ValueBounds;
    use serde_json::json;

    const NOW: i64 = 1_705_315_800_000;

    fn service_with_memory() -> (IngestionService, Arc<InMemoryReadingStore>) {
        let clock = Arc::new(ManualClock::from_millis(NOW));
        let store = Arc::new(InMemoryReadingStore::new(clock.clone()));
        let validator = ReadingValidator::new(Some(ValueBounds::default()), clock);
        (IngestionService::new(validator, store.clone()), store)
    }

    #[tokio::test]
    async fn test_ingest_then_latest() {
        let (service, store) = service_with_memory();

        let stored = service
            .ingest(
                &json!({"device_id": "s1", "value": 23.5, "timestamp": 42}),
                IngestSource::Rest,
            )
            .await
            .unwrap();

        assert_eq!(stored.device_id, "s1");
        assert_eq!(stored.value, 23.5);
        assert_eq!(stored.timestamp, 42);
        assert_eq!(store.latest("s1").await.unwrap(), Some(stored));
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_ingest_substitutes_timestamp() {
        let (service, _) = service_with_memory();

        let stored = service
            .ingest(&json!({"device_id": "s1", "value": 23.5}), IngestSource::Mqtt)
            .await
            .unwrap();

        assert_eq!(stored.timestamp, NOW);
    }

    #[tokio::test]
    async fn test_missing_device_id_persists_nothing() {
        let (service, store) = service_with_memory();

        let err = service
            .ingest(&json!({"value": 23.5}), IngestSource::Rest)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Validation(ref v) if v.has_field("device_id")));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_non_numeric_value_persists_nothing() {
        let (service, store) = service_with_memory();

        let err = service
            .ingest(&json!({"device_id": "s1", "value": "hot"}), IngestSource::Rest)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Validation(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_store_error_is_surfaced() {
        let mut store = MockReadingStore::new();
        store
            .expect_insert()
            .times(1)
            .returning(|_| Err(StoreError::Unavailable("connection refused".to_string())));

        let validator =
            ReadingValidator::new(None, Arc::new(ManualClock::from_millis(NOW)));
        let service = IngestionService::new(validator, Arc::new(store));

        let err = service
            .ingest(&json!({"device_id": "s1", "value": 1.0}), IngestSource::Mqtt)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Store(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_invalid_input_never_reaches_store() {
        let mut store = MockReadingStore::new();
        store.expect_insert().times(0);

        let validator =
            ReadingValidator::new(None, Arc::new(ManualClock::from_millis(NOW)));
        let service = IngestionService::new(validator, Arc::new(store));

        let result = service
            .ingest(&json!({"device_id": "", "value": 1.0}), IngestSource::Rest)
            .await;
        assert!(result.is_err());
    }
}
