use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, trace};
use uuid::Uuid;

use super::{ReadingStore, StoreResult};
use crate::clock::Clock;
use crate::models::{Reading, StoredReading};

/// Index key within one device: event time, persistence time in
/// microseconds, then insertion sequence.
type IndexKey = (i64, i64, u64);

type DeviceIndex = Arc<RwLock<BTreeMap<IndexKey, StoredReading>>>;

/// In-memory reading store.
///
/// # Index Layout
///
/// ```text
/// devices: device_id ─► BTreeMap<(timestamp, created_at_us, seq), StoredReading>
/// ```
///
/// `latest` takes the last entry of one device's map: O(log n) in that
/// device's reading count, unaffected by other devices.
///
/// # Locking
///
/// - The outer map is write-locked only the first time a device is seen.
/// - Each device has its own lock, so readers of different devices never
///   contend and inserts only block readers of the same device for the
///   duration of one `BTreeMap::insert`.
/// - `seq` and `created_at` come from atomics, so inserts for different
///   devices share no lock.
pub struct InMemoryReadingStore {
    devices: RwLock<HashMap<String, DeviceIndex>>,
    next_seq: AtomicU64,
    /// Highest `created_at` handed out, in microseconds
    last_created_at: AtomicI64,
    clock: Arc<dyn Clock>,
}

impl InMemoryReadingStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            last_created_at: AtomicI64::new(0),
            clock,
        }
    }

    /// Total number of stored readings across all devices.
    pub async fn len(&self) -> usize {
        let devices = self.devices.read().await;
        let mut total = 0;
        for index in devices.values() {
            total += index.read().await.len();
        }
        total
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Number of stored readings for one device.
    pub async fn device_len(&self, device_id: &str) -> usize {
        match self.device_index(device_id).await {
            Some(index) => index.read().await.len(),
            None => 0,
        }
    }

    async fn device_index(&self, device_id: &str) -> Option<DeviceIndex> {
        self.devices.read().await.get(device_id).cloned()
    }

    async fn device_index_or_create(&self, device_id: &str) -> DeviceIndex {
        if let Some(index) = self.device_index(device_id).await {
            return index;
        }

        let mut devices = self.devices.write().await;
        devices
            .entry(device_id.to_string())
            .or_insert_with(|| {
                debug!(device_id, "Creating index for new device");
                Arc::new(RwLock::new(BTreeMap::new()))
            })
            .clone()
    }

    /// Persistence time at microsecond precision, never earlier than any
    /// value handed out before, even if the wall clock steps backwards.
    fn next_created_at(&self) -> (i64, DateTime<Utc>) {
        let now = self.clock.now();
        let now_us = now.timestamp_micros();
        let created_us = self
            .last_created_at
            .fetch_max(now_us, Ordering::SeqCst)
            .max(now_us);
        let created_at = DateTime::from_timestamp_micros(created_us).unwrap_or(now);
        (created_us, created_at)
    }
}

#[async_trait]
impl ReadingStore for InMemoryReadingStore {
    async fn insert(&self, reading: Reading) -> StoreResult<StoredReading> {
        let index = self.device_index_or_create(&reading.device_id).await;
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let (created_us, created_at) = self.next_created_at();

        let stored = StoredReading::from_reading(reading, Uuid::new_v4(), created_at);
        index
            .write()
            .await
            .insert((stored.timestamp, created_us, seq), stored.clone());

        trace!(id = %stored.id, device_id = %stored.device_id, seq, "Reading stored in memory");
        Ok(stored)
    }

    async fn latest(&self, device_id: &str) -> StoreResult<Option<StoredReading>> {
        let Some(index) = self.device_index(device_id).await else {
            return Ok(None);
        };

        let latest = index
            .read()
            .await
            .last_key_value()
            .map(|(_, reading)| reading.clone());
        Ok(latest)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
