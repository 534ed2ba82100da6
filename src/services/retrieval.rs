use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, instrument};

use crate::metrics;
use crate::models::StoredReading;
use crate::store::{ReadingStore, StoreError};

/// Failure of a latest-reading lookup.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("No readings found for device '{0}'")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Latest-reading lookups.
#[derive(Clone)]
pub struct RetrievalService {
    store: Arc<dyn ReadingStore>,
}

impl RetrievalService {
    pub fn new(store: Arc<dyn ReadingStore>) -> Self {
        Self { store }
    }

    /// Most recent reading for `device_id`.
    #[instrument(skip(self))]
    pub async fn get_latest(&self, device_id: &str) -> Result<StoredReading, RetrievalError> {
        match self.store.latest(device_id).await {
            Ok(Some(reading)) => {
                metrics::record_latest_lookup("found");
                Ok(reading)
            }
            Ok(None) => {
                metrics::record_latest_lookup("not_found");
                debug!("No readings for device");
                Err(RetrievalError::NotFound(device_id.to_string()))
            }
            Err(e) => {
                metrics::record_latest_lookup("error");
                Err(e.into())
            }
        }
    }
}
