//! Shared application state for Axum handlers.
//!
//! This module provides thread-safe, clonable state that is shared across
//! all request handlers. It includes:
//!
//! - **Services**: Ingestion and retrieval over the injected reading store
//! - **Connection state**: Store ping result and MQTT connection flags
//! - **Configuration**: Runtime configuration access
//!
//! # Structured Concurrency
//!
//! Background tasks (the MQTT intake and the store health check) are managed
//! using `tokio_util::task::TaskTracker` and `CancellationToken`. Call
//! `shutdown()` to stop them before application exit.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::metrics;
use crate::mqtt::{ConnectionState, MqttIntake};
use crate::services::{IngestionService, RetrievalService};
use crate::store::ReadingStore;
use crate::validation::ReadingValidator;

/// Shared application state for Axum handlers.
///
/// Cloned for each request; all internal data is behind `Arc`.
///
/// # Lifecycle
///
/// Background tasks are spawned when the state is created. Call `shutdown()`
/// before dropping to ensure clean task termination:
///
/// ```rust,ignore
/// let state = AppState::new(store, config)?;
/// // ... serve requests ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    pub ingestion: IngestionService,
    pub retrieval: RetrievalService,
    pub store: Arc<dyn ReadingStore>,
    /// MQTT connection state, `None` when the MQTT intake is disabled
    pub mqtt: Option<Arc<ConnectionState>>,
    /// Timestamp when the application started
    pub started_at: Instant,
    /// Application configuration
    pub config: Arc<Config>,
    /// Result of the last background store ping
    store_connected: Arc<AtomicBool>,
    /// Tracks spawned background tasks for graceful shutdown
    task_tracker: TaskTracker,
    /// Cancellation token for signaling background tasks to stop
    cancellation_token: CancellationToken,
}

impl AppState {
    /// Create application state over a connected store, using the system clock.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if the MQTT settings are invalid.
    pub fn new(store: Arc<dyn ReadingStore>, config: Config) -> AppResult<Self> {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Create application state with an explicit clock for substituted
    /// timestamps.
    ///
    /// # Background Tasks
    ///
    /// Spawns the store health check and, when `config.mqtt_enabled`, the
    /// MQTT intake. Must be called from within a tokio runtime.
    pub fn with_clock(
        store: Arc<dyn ReadingStore>,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> AppResult<Self> {
        let validator = ReadingValidator::new(config.value_bounds(), clock);
        let ingestion = IngestionService::new(validator, store.clone());
        let retrieval = RetrievalService::new(store.clone());

        // Build the intake before spawning anything so bad settings leave no tasks behind
        let (mqtt, intake) = if config.mqtt_enabled {
            let connection = Arc::new(ConnectionState::new());
            let intake = MqttIntake::from_config(&config, ingestion.clone(), connection.clone())
                .map_err(|e| AppError::ConfigError(e.to_string()))?;
            (Some(connection), Some(intake))
        } else {
            (None, None)
        };

        let state = Self {
            ingestion,
            retrieval,
            store,
            mqtt,
            started_at: Instant::now(),
            config: Arc::new(config),
            store_connected: Arc::new(AtomicBool::new(true)),
            task_tracker: TaskTracker::new(),
            cancellation_token: CancellationToken::new(),
        };

        metrics::set_store_connection_status(true);
        state.spawn_store_health_task();
        if let Some(intake) = intake {
            state
                .task_tracker
                .spawn(intake.run(state.cancellation_token.clone()));
        }

        Ok(state)
    }

    /// Result of the last background store ping.
    pub fn store_connected(&self) -> bool {
        self.store_connected.load(Ordering::SeqCst)
    }

    /// MQTT connection flag, `None` when the intake is disabled.
    pub fn mqtt_connected(&self) -> Option<bool> {
        self.mqtt.as_ref().map(|m| m.is_connected())
    }

    /// Ping the store now and record the result.
    pub async fn check_store(&self) -> bool {
        ping_and_record(self.store.as_ref(), &self.store_connected).await
    }

    /// Spawn a background store health check.
    ///
    /// Periodically pings the store so `/health` reports a recent result
    /// without a round trip per request.
    fn spawn_store_health_task(&self) {
        let store = self.store.clone();
        let store_connected = self.store_connected.clone();
        let interval_duration = self.config.store_health_check_interval;
        let cancel = self.cancellation_token.clone();

        self.task_tracker.spawn(async move {
            let mut ticker = interval(interval_duration);
            ticker.tick().await; // Skip first immediate tick

            loop {
                tokio::select! {
                    biased;

                    _ = cancel.cancelled() => {
                        debug!("Store health check task received cancellation signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        ping_and_record(store.as_ref(), &store_connected).await;
                    }
                }
            }

            debug!("Store health check task shutting down");
        });
    }

    /// Gracefully shutdown all background tasks.
    ///
    /// This method:
    /// 1. Signals all tasks to stop via cancellation token
    /// 2. Closes the task tracker (prevents new tasks)
    /// 3. Waits for all tasks to complete
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");

        self.cancellation_token.cancel();
        self.task_tracker.close();
        self.task_tracker.wait().await;

        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

async fn ping_and_record(store: &dyn ReadingStore, store_connected: &AtomicBool) -> bool {
    let connected = match store.ping().await {
        Ok(()) => {
            trace!(backend = store.backend(), "Store ping OK");
            true
        }
        Err(e) => {
            warn!(backend = store.backend(), error = %e, "Store ping failed");
            false
        }
    };

    let previous = store_connected.swap(connected, Ordering::SeqCst);
    if previous != connected {
        info!(backend = store.backend(), connected, "Store connection status changed");
    }
    metrics::set_store_connection_status(connected);
    connected
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::{InMemoryReadingStore, MockReadingStore, StoreError};

    fn memory_config() -> Config {
        Config {
            mqtt_enabled: false,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_state_without_mqtt() {
        let store = Arc::new(InMemoryReadingStore::new(Arc::new(SystemClock)));
        let state = AppState::new(store, memory_config()).unwrap();

        assert!(state.mqtt.is_none());
        assert_eq!(state.mqtt_connected(), None);
        assert!(state.store_connected());
        assert!(state.check_store().await);

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_failed_ping_is_recorded() {
        let mut store = MockReadingStore::new();
        store
            .expect_ping()
            .returning(|| Err(StoreError::Unavailable("refused".to_string())));
        store.expect_backend().return_const("mock");

        let state = AppState::new(Arc::new(store), memory_config()).unwrap();
        assert!(!state.check_store().await);
        assert!(!state.store_connected());

        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_mqtt_settings_rejected() {
        let store = Arc::new(InMemoryReadingStore::new(Arc::new(SystemClock)));
        let config = Config {
            mqtt_enabled: true,
            mqtt_topic: "iot/#".to_string(),
            ..Config::default()
        };

        let result = AppState::new(store, config);
        assert!(matches!(result, Err(AppError::ConfigError(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_mqtt_intake() {
        let store = Arc::new(InMemoryReadingStore::new(Arc::new(SystemClock)));
        let config = Config {
            mqtt_enabled: true,
            mqtt_broker_url: "mqtt://127.0.0.1:1".to_string(),
            ..Config::default()
        };

        let state = AppState::new(store, config).unwrap();
        assert_eq!(state.mqtt_connected(), Some(false));

        tokio::time::timeout(std::time::Duration::from_secs(5), state.shutdown())
            .await
            .expect("shutdown did not complete");
    }
}
