//! # Sensor Ingest
//!
//! Sensor telemetry ingestion over HTTP and MQTT, with a latest-reading
//! lookup per device:
//!
//! - **One write path**: REST and MQTT intake share a single validator and
//!   ingestion service, so records are indistinguishable by origin
//! - **Indexed lookups**: `latest(device_id)` is a bounded index lookup in both
//!   the in-memory and PostgreSQL stores
//! - **Resilience**: MQTT reconnects with exponential backoff and re-subscribes
//!   on every new session
//! - **Observability**: Request IDs, structured logging, Prometheus metrics
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────┐   ┌──────────────────────────┐
//! │  Axum HTTP Server        │   │  MQTT Intake             │
//! │  POST /api/sensor/ingest │   │  iot/sensor/+/value      │
//! │  GET  /api/sensor/{id}/… │   │                          │
//! └────────────┬─────────────┘   └────────────┬─────────────┘
//!              │                              │
//!              ▼                              ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │  IngestionService (ReadingValidator) │ RetrievalService │
//! ├─────────────────────────────────────────────────────────┤
//! │  ReadingStore (InMemoryReadingStore | PostgresReadingStore)
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use sensor_ingest::clock::SystemClock;
//! use sensor_ingest::store::InMemoryReadingStore;
//! use sensor_ingest::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let store = Arc::new(InMemoryReadingStore::new(Arc::new(SystemClock)));
//!
//!     let state = AppState::new(store, config)?;
//!     let app = build_router(state);
//!
//!     // Start the server...
//!     Ok(())
//! }
//! ```
//!
//! ## Storage Configuration
//!
//! Run against PostgreSQL instead of the in-memory store:
//! ```bash
//! STORE_BACKEND=postgres DATABASE_URL=postgres://localhost/sensors cargo run
//! ```
//!
//! Run HTTP-only:
//! ```bash
//! MQTT_ENABLED=false cargo run
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod mqtt;
pub mod routes;
pub mod services;
pub mod state;
pub mod store;
pub mod utils;
pub mod validation;

// Re-exports for convenience
pub use config::{Config, LogFormat, StoreBackend};
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
pub use store::{InMemoryReadingStore, PostgresReadingStore, ReadingStore};
