//! In-memory value store implementation using DashMap.

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::core::data::{SensorReading, ValueBatch};
use crate::core::error::Result;

use super::traits::{ValueEvent, ValueStore};

/// Default capacity of the change-event channel.
const EVENT_CAPACITY: usize = 256;

/// In-memory value store using DashMap for concurrent access.
///
/// This is the default outbound sink. Lagging subscribers lose the oldest
/// events rather than blocking the poll loop.
///
/// # Example
///
/// ```rust
/// use sunsynk_gw::store::MemoryStore;
///
/// let store = MemoryStore::new();
/// ```
pub struct MemoryStore {
    /// sensor_id -> latest reading
    data: DashMap<String, SensorReading>,

    /// Change notifications
    events: broadcast::Sender<ValueEvent>,
}

impl MemoryStore {
    /// Create a new memory store.
    pub fn new() -> Self {
        Self::with_capacity(EVENT_CAPACITY)
    }

    /// Create a store whose event channel buffers `capacity` events.
    pub fn with_capacity(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            data: DashMap::new(),
            events,
        }
    }

    /// Number of sensors with a stored reading.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing was published yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ValueStore for MemoryStore {
    async fn publish(&self, batch: &ValueBatch) -> Result<()> {
        let mut changed = ValueBatch::new();

        for reading in batch {
            let prev = self.data.insert(reading.sensor_id.clone(), reading.clone());
            if prev.map_or(true, |p| p.value != reading.value) {
                changed.add(reading.clone());
            }
        }

        // No receivers is fine
        if !changed.is_empty() {
            let _ = self.events.send(ValueEvent::Changed(changed));
        }

        Ok(())
    }

    async fn latest(&self, sensor_id: &str) -> Result<Option<SensorReading>> {
        Ok(self.data.get(sensor_id).map(|r| r.value().clone()))
    }

    async fn snapshot(&self) -> Result<ValueBatch> {
        let mut readings: Vec<SensorReading> =
            self.data.iter().map(|e| e.value().clone()).collect();
        readings.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        Ok(readings.into_iter().collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<ValueEvent> {
        self.events.subscribe()
    }
}
