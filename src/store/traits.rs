//! ValueStore trait definition.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::core::data::{SensorReading, ValueBatch};
use crate::core::error::Result;

/// Event emitted by a [`ValueStore`].
#[derive(Debug, Clone)]
pub enum ValueEvent {
    /// Readings whose value differs from the previously published one.
    Changed(ValueBatch),
}

/// Trait for outbound value sinks.
///
/// The poll driver publishes each completed cycle here; publishers (message
/// bus bridges, the CLI printer) read from it or subscribe to changes.
#[async_trait]
pub trait ValueStore: Send + Sync {
    /// Store a batch of readings.
    async fn publish(&self, batch: &ValueBatch) -> Result<()>;

    /// Latest reading of one sensor.
    async fn latest(&self, sensor_id: &str) -> Result<Option<SensorReading>>;

    /// Latest reading of every sensor, ordered by sensor id.
    async fn snapshot(&self) -> Result<ValueBatch>;

    /// Subscribe to change events.
    fn subscribe(&self) -> broadcast::Receiver<ValueEvent>;
}
