//! Decoded value types.
//!
//! The register engine turns raw 16-bit words into [`Value`]s. Values are
//! collected into [`SensorReading`]s and [`ValueBatch`]es for the outbound
//! side (publisher, CLI output).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A decoded sensor value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Scaled measurement.
    Float(f64),

    /// Unscaled (factor 1) measurement or raw setting.
    Integer(i64),

    /// Display text (serial number, fault list, state names, option labels).
    String(String),

    /// No value decoded yet.
    #[default]
    Null,
}

impl Value {
    /// Try to get the value as f64.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Integer(v) => Some(*v as f64),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Try to get the value as i64.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(v) => Some(*v),
            Self::Float(v) => Some(*v as i64),
            Self::String(s) => s.trim().parse().ok(),
            Self::Null => None,
        }
    }

    /// Try to get the value as string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Check if this is a null value.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Render the value the way it is published.
    ///
    /// Integral floats are printed without a fractional part, other floats with
    /// at most two decimals and trailing zeros removed.
    pub fn to_payload(&self) -> String {
        match self {
            Self::Float(v) if v.fract() == 0.0 => format!("{}", *v as i64),
            Self::Float(v) => {
                let s = format!("{:.2}", v);
                s.trim_end_matches('0').trim_end_matches('.').to_string()
            }
            Self::Integer(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::Null => String::new(),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_payload())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<u16> for Value {
    fn from(v: u16) -> Self {
        Self::Integer(v as i64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl std::str::FromStr for Value {
    type Err = std::convert::Infallible;

    /// Parse user input (CLI, write queue): integers, then floats, else text.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(v) = s.parse::<i64>() {
            return Ok(Self::Integer(v));
        }
        if let Ok(v) = s.parse::<f64>() {
            return Ok(Self::Float(v));
        }
        Ok(Self::String(s.to_string()))
    }
}

/// The last decoded value of one sensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SensorReading {
    /// Sensor id (slug).
    pub sensor_id: String,

    /// Decoded value.
    pub value: Value,

    /// Physical unit, empty for unitless sensors.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,

    /// When the engine decoded the value.
    pub timestamp: DateTime<Utc>,
}

impl SensorReading {
    /// Create a reading stamped with the current time.
    pub fn new(sensor_id: impl Into<String>, value: Value, unit: impl Into<String>) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            value,
            unit: unit.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A batch of readings produced by one poll cycle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValueBatch {
    readings: Vec<SensorReading>,
}

impl ValueBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty batch with pre-allocated capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            readings: Vec::with_capacity(capacity),
        }
    }

    /// Add a reading.
    pub fn add(&mut self, reading: SensorReading) {
        self.readings.push(reading);
    }

    /// Number of readings.
    pub fn len(&self) -> usize {
        self.readings.len()
    }

    /// Check if batch is empty.
    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    /// Find the reading for a sensor id.
    pub fn get(&self, sensor_id: &str) -> Option<&SensorReading> {
        self.readings.iter().find(|r| r.sensor_id == sensor_id)
    }

    /// Iterate over all readings.
    pub fn iter(&self) -> impl Iterator<Item = &SensorReading> {
        self.readings.iter()
    }
}

impl IntoIterator for ValueBatch {
    type Item = SensorReading;
    type IntoIter = std::vec::IntoIter<SensorReading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.into_iter()
    }
}

impl<'a> IntoIterator for &'a ValueBatch {
    type Item = &'a SensorReading;
    type IntoIter = std::slice::Iter<'a, SensorReading>;

    fn into_iter(self) -> Self::IntoIter {
        self.readings.iter()
    }
}

impl FromIterator<SensorReading> for ValueBatch {
    fn from_iter<I: IntoIterator<Item = SensorReading>>(iter: I) -> Self {
        Self {
            readings: iter.into_iter().collect(),
        }
    }
}
