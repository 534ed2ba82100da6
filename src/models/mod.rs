mod api;
mod reading;

pub use api::{ApiResponse, ErrorResponse, HealthResponse};
pub use reading::{IngestSource, Reading, StoredReading};
