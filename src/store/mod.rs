//! Reading persistence.
//!
//! [`ReadingStore`] is the only seam between the services and the backing
//! collection. Both implementations maintain the same ordering index:
//!
//! ```text
//! (device_id, timestamp DESC, created_at DESC, seq DESC)
//! ```
//!
//! so `latest(device_id)` is a bounded prefix lookup whose cost depends on
//! that device's history only, never on the total number of readings.
//!
//! - [`InMemoryReadingStore`] - per-device ordered maps, used for tests and
//!   single-node development
//! - [`PostgresReadingStore`] - `sensor_readings` table with a composite
//!   B-tree index, pooled through `deadpool-postgres`

mod memory;
mod postgres;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Reading, StoredReading};

pub use memory::InMemoryReadingStore;
pub use postgres::{PostgresReadingStore, SCHEMA_SQL};

/// Persistence failures. Always surfaced to the caller.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The backend could not be reached (pool exhausted, connection refused).
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The backend rejected a statement.
    #[error("Store query failed: {0}")]
    Query(String),

    /// Schema bootstrap failed at startup.
    #[error("Store schema setup failed: {0}")]
    Schema(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Append-only reading collection with a latest-by-device index.
///
/// Implementations must make each insert atomic: a concurrent `latest` sees
/// either the state before the insert or after it, never a partial record.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist a reading, assigning its `id` and `created_at`.
    ///
    /// Duplicate `(device_id, timestamp)` pairs are stored as distinct records.
    async fn insert(&self, reading: Reading) -> StoreResult<StoredReading>;

    /// The reading with the greatest `timestamp` for `device_id`, ties going
    /// to the most recently persisted one. `None` if the device has no readings.
    async fn latest(&self, device_id: &str) -> StoreResult<Option<StoredReading>>;

    /// Check that the backend is reachable.
    async fn ping(&self) -> StoreResult<()>;

    /// Short backend name for logs (`memory`, `postgres`).
    fn backend(&self) -> &'static str;
}
