//! Core services shared by the intake adapters and HTTP handlers.
//!
//! - [`IngestionService`] - validate + persist, the single write path
//! - [`RetrievalService`] - latest reading per device

mod ingestion;
mod retrieval;

pub use ingestion::{IngestError, IngestionService};
pub use retrieval::{RetrievalError, RetrievalService};
