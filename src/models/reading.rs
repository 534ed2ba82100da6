use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A validated reading that has not been persisted yet.
///
/// Produced by the validator, consumed by a store insert. `timestamp` is
/// always populated: either client-supplied or substituted at ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Originating device. Never empty.
    pub device_id: String,
    /// Measured value. Always finite.
    pub value: f64,
    /// When the measurement occurred, milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// A reading as persisted by a store.
///
/// `timestamp` is when the event occurred; `created_at` is when the store
/// recorded it. The two diverge when MQTT delivery lags or reorders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredReading {
    /// Store-generated identifier
    pub id: Uuid,
    /// Originating device
    pub device_id: String,
    /// Measured value
    pub value: f64,
    /// Event time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Persistence time
    pub created_at: DateTime<Utc>,
}

impl StoredReading {
    /// Build the stored form of a reading.
    pub fn from_reading(reading: Reading, id: Uuid, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            device_id: reading.device_id,
            value: reading.value,
            timestamp: reading.timestamp,
            created_at,
        }
    }
}

/// Which intake path a reading came through.
///
/// Only used for logs and metrics labels. Stored readings carry no trace of
/// their origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestSource {
    Rest,
    Mqtt,
}

impl IngestSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestSource::Rest => "rest",
            IngestSource::Mqtt => "mqtt",
        }
    }
}

impl fmt::Display for IngestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
