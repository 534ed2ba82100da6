use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sensor_ingest::clock::SystemClock;
use sensor_ingest::{
    AppState, Config, InMemoryReadingStore, LogFormat, PostgresReadingStore, ReadingStore,
    StoreBackend, build_router, metrics, utils,
};

#[tokio::main]
async fn main() -> ExitCode {
    // Load configuration before logging so LOG_FORMAT applies from the first line
    let config = Config::from_env();

    match &config {
        Ok(config) => init_logging(config.log_format, &config.log_level),
        Err(_) => init_logging(LogFormat::Pretty, DEFAULT_LOG_FILTER),
    }

    info!(
        "Starting Sensor Ingest v{}",
        env!("CARGO_PKG_VERSION")
    );

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {e}");
            return ExitCode::from(exitcode::CONFIG as u8);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::from(exitcode::OK as u8),
        Err(exit_code) => ExitCode::from(exit_code as u8),
    }
}

const DEFAULT_LOG_FILTER: &str = "info";

/// Build the log filter from `RUST_LOG` as captured in `Config::log_level`.
/// An unparsable directive falls back to `info`.
fn log_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|e| {
        eprintln!("Invalid RUST_LOG '{directives}' ({e}), using '{DEFAULT_LOG_FILTER}'");
        EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn init_logging(format: LogFormat, directives: &str) {
    let filter = log_filter(directives);

    match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .init(),
    }
}

/// Connect the configured store. Startup fails if it cannot be reached.
async fn build_store(config: &Config) -> Result<Arc<dyn ReadingStore>, exitcode::ExitCode> {
    match config.store_backend {
        StoreBackend::Memory => {
            info!("Using in-memory reading store");
            Ok(Arc::new(InMemoryReadingStore::new(Arc::new(SystemClock))))
        }
        StoreBackend::Postgres => {
            info!("Connecting to PostgreSQL...");
            let store = PostgresReadingStore::connect(&config.database_url, config.database_pool_size)
                .map_err(|e| {
                    error!("Invalid PostgreSQL configuration: {e}");
                    exitcode::CONFIG
                })?;

            store.ping().await.map_err(|e| {
                error!("Failed to connect to PostgreSQL: {e}");
                exitcode::UNAVAILABLE
            })?;

            store.ensure_schema().await.map_err(|e| {
                error!("Failed to prepare reading schema: {e}");
                exitcode::UNAVAILABLE
            })?;

            info!(pool_size = config.database_pool_size, "PostgreSQL reading store ready");
            Ok(Arc::new(store))
        }
    }
}

/// Run the application, returning an exit code on error.
async fn run(config: Config) -> Result<(), exitcode::ExitCode> {
    info!(
        host = %config.host,
        port = %config.port,
        store = %config.store_backend,
        mqtt_enabled = config.mqtt_enabled,
        mqtt_topic = %config.mqtt_topic,
        "Configuration loaded"
    );

    // Store must be reachable before any intake starts
    let store = build_store(&config).await?;

    if let Some(addr) = config.metrics_addr() {
        metrics::try_init_metrics(addr);
    }

    // Build application state (spawns the MQTT intake) and router
    let state = AppState::new(store, config.clone()).map_err(|e| {
        error!("Failed to initialize application: {e}");
        exitcode::CONFIG
    })?;
    let app = build_router(state.clone());

    let addr: SocketAddr = config.server_addr().parse().map_err(|e| {
        error!("Invalid server address: {e}");
        exitcode::CONFIG
    })?;
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to {addr}: {e}");
        exitcode::UNAVAILABLE
    })?;

    info!("Server listening on http://{addr}");
    info!("API endpoints:");
    info!("  GET  /health                         - Health check");
    info!("  GET  /ready                          - Readiness check");
    info!("  POST /api/sensor/ingest              - Ingest a reading");
    info!("  GET  /api/sensor/{{device_id}}/latest  - Latest reading for a device");

    // Start server with graceful shutdown
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(utils::shutdown_signal())
        .await;

    // Stop the MQTT intake and health task even if the server failed
    info!("HTTP server stopped, shutting down background tasks...");
    state.shutdown().await;

    served.map_err(|e| {
        error!("Server error: {e}");
        exitcode::SOFTWARE
    })?;

    info!("Server shutdown complete");
    Ok(())
}
