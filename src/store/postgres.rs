use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, PoolError, RecyclingMethod};
use tokio_postgres::{NoTls, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use super::{ReadingStore, StoreError, StoreResult};
use crate::models::{Reading, StoredReading};

/// Table and index bootstrap, applied idempotently at startup.
///
/// `seq` gives a total insertion order for readings whose `created_at`
/// collides at microsecond resolution. The composite index matches the
/// `ORDER BY` of [`LATEST_SQL`] exactly, so the lookup is an index scan that
/// stops after the first row.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS sensor_readings (
    seq         BIGSERIAL PRIMARY KEY,
    id          UUID NOT NULL UNIQUE,
    device_id   TEXT NOT NULL CHECK (device_id <> ''),
    value       DOUBLE PRECISION NOT NULL,
    "timestamp" BIGINT NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
);

CREATE INDEX IF NOT EXISTS sensor_readings_device_latest_idx
    ON sensor_readings (device_id, "timestamp" DESC, created_at DESC, seq DESC);
"#;

const INSERT_SQL: &str = r#"
INSERT INTO sensor_readings (id, device_id, value, "timestamp")
VALUES ($1, $2, $3, $4)
RETURNING created_at
"#;

const LATEST_SQL: &str = r#"
SELECT id, device_id, value, "timestamp", created_at
FROM sensor_readings
WHERE device_id = $1
ORDER BY "timestamp" DESC, created_at DESC, seq DESC
LIMIT 1
"#;

/// PostgreSQL-backed reading store with connection pooling.
#[derive(Clone)]
pub struct PostgresReadingStore {
    pool: Pool,
}

impl PostgresReadingStore {
    /// Build a pooled store from a `postgres://` connection string.
    ///
    /// No connection is opened here; call [`ReadingStore::ping`] and
    /// [`PostgresReadingStore::ensure_schema`] before serving traffic.
    pub fn connect(database_url: &str, max_pool_size: usize) -> StoreResult<Self> {
        let pg_config: tokio_postgres::Config = database_url
            .parse()
            .map_err(|e: tokio_postgres::Error| StoreError::Unavailable(e.to_string()))?;

        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(manager)
            .max_size(max_pool_size)
            .build()
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create the readings table and its latest-lookup index if missing.
    #[instrument(skip(self))]
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.batch_execute(SCHEMA_SQL)
            .await
            .map_err(|e| StoreError::Schema(e.to_string()))?;

        info!("sensor_readings schema ready");
        Ok(())
    }
}

#[async_trait]
impl ReadingStore for PostgresReadingStore {
    #[instrument(skip(self, reading), fields(device_id = %reading.device_id))]
    async fn insert(&self, reading: Reading) -> StoreResult<StoredReading> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let stmt = conn.prepare_cached(INSERT_SQL).await.map_err(query_error)?;

        let id = Uuid::new_v4();
        let row = conn
            .query_one(
                &stmt,
                &[&id, &reading.device_id, &reading.value, &reading.timestamp],
            )
            .await
            .map_err(query_error)?;

        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(query_error)?;
        debug!(%id, "Reading inserted");

        Ok(StoredReading::from_reading(reading, id, created_at))
    }

    #[instrument(skip(self))]
    async fn latest(&self, device_id: &str) -> StoreResult<Option<StoredReading>> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        let stmt = conn.prepare_cached(LATEST_SQL).await.map_err(query_error)?;

        conn.query_opt(&stmt, &[&device_id])
            .await
            .map_err(query_error)?
            .map(|row| row_to_reading(&row))
            .transpose()
    }

    async fn ping(&self) -> StoreResult<()> {
        let conn = self.pool.get().await.map_err(pool_error)?;
        conn.execute("SELECT 1", &[]).await.map_err(query_error)?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

fn row_to_reading(row: &Row) -> StoreResult<StoredReading> {
    Ok(StoredReading {
        id: row.try_get("id").map_err(query_error)?,
        device_id: row.try_get("device_id").map_err(query_error)?,
        value: row.try_get("value").map_err(query_error)?,
        timestamp: row.try_get("timestamp").map_err(query_error)?,
        created_at: row.try_get("created_at").map_err(query_error)?,
    })
}

fn pool_error(e: PoolError) -> StoreError {
    StoreError::Unavailable(e.to_string())
}

fn query_error(e: tokio_postgres::Error) -> StoreError {
    // A dropped connection is an availability problem, not a bad statement
    if e.is_closed() {
        StoreError::Unavailable(e.to_string())
    } else {
        StoreError::Query(e.to_string())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_rejects_malformed_url() {
        let result = PostgresReadingStore::connect("postgres://user@host:notaport/db", 4);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_connect_is_lazy() {
        // Nothing listens on port 1; building the pool must still succeed
        let store = PostgresReadingStore::connect("postgres://u:p@127.0.0.1:1/db", 4).unwrap();
        assert_eq!(store.backend(), "postgres");
    }

    #[test]
    fn test_index_matches_latest_ordering() {
        assert!(SCHEMA_SQL.contains(r#"(device_id, "timestamp" DESC, created_at DESC, seq DESC)"#));
        assert!(LATEST_SQL.contains(r#"ORDER BY "timestamp" DESC, created_at DESC, seq DESC"#));
    }
}
