mod health;
mod sensor;

pub use health::{health_check, readiness_check};
pub use sensor::{get_latest, ingest_reading};
