//! Sensor definitions.
//!
//! A [`Sensor`] names one or more holding registers together with the
//! transform that turns their raw words into a [`Value`](crate::core::Value).
//! Sensors are immutable once built and shared as `Arc<Sensor>`.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

/// Physical units used by the catalog.
pub mod units {
    pub const CELSIUS: &str = "°C";
    pub const KWH: &str = "kWh";
    pub const AMPS: &str = "A";
    pub const VOLT: &str = "V";
    pub const WATT: &str = "W";
    pub const HERTZ: &str = "Hz";
    pub const PERCENT: &str = "%";
}

/// Decode/encode variant of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SensorKind {
    /// Scaled numeric register(s).
    Plain,

    /// Scaled numeric register with a fixed calibration offset.
    Temperature,

    /// ASCII serial number packed two characters per register.
    Serial,

    /// Fault bit field spread over several registers.
    Fault,

    /// Overall inverter state enumeration.
    InverterState,

    /// SD card status enumeration.
    SdStatus,

    /// Linear combination of other registers' decoded values.
    Math {
        factors: Vec<f64>,
        absolute: bool,
        no_negative: bool,
    },

    /// Writable numeric setting.
    Number { min: f64, max: f64 },

    /// Writable enumerated setting.
    Select { options: Vec<(u16, String)> },

    /// Writable time of day stored as `HHMM`.
    Time,
}

impl SensorKind {
    /// Whether the kind is a setting the user may change.
    ///
    /// Plain and temperature measurements still encode, but their registers
    /// are read-only on the device.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Number { .. } | Self::Select { .. } | Self::Time)
    }

    /// Whether the kind decodes to a number that math sensors may reference.
    pub fn is_numeric(&self) -> bool {
        matches!(self, Self::Plain | Self::Temperature | Self::Number { .. })
    }
}

/// An immutable sensor definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    /// Stable identifier derived from the name.
    pub id: String,

    /// Human readable name.
    pub name: String,

    /// Register addresses, least significant word first for multi-register
    /// numbers.
    pub address: Vec<u16>,

    /// Scale factor. A negative factor marks the raw word as signed.
    pub factor: f64,

    /// Physical unit, empty for unitless sensors.
    pub unit: String,

    /// Bits of the first register owned by this sensor (writes only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bitmask: Option<u16>,

    /// Decode/encode variant.
    pub kind: SensorKind,
}

impl Sensor {
    /// Create a plain sensor.
    pub fn new(address: impl Into<Vec<u16>>, name: &str, unit: &str, factor: f64) -> Self {
        Self {
            id: slug(name),
            name: name.to_string(),
            address: address.into(),
            factor,
            unit: unit.to_string(),
            bitmask: None,
            kind: SensorKind::Plain,
        }
    }

    /// Create a temperature sensor.
    pub fn temperature(address: u16, name: &str, factor: f64) -> Self {
        Self::new(vec![address], name, units::CELSIUS, factor).with_kind(SensorKind::Temperature)
    }

    /// Create a serial-number sensor.
    pub fn serial(address: impl Into<Vec<u16>>, name: &str) -> Self {
        Self::new(address, name, "", 1.0).with_kind(SensorKind::Serial)
    }

    /// Create a fault bit-field sensor.
    pub fn fault(address: impl Into<Vec<u16>>, name: &str) -> Self {
        Self::new(address, name, "", 1.0).with_kind(SensorKind::Fault)
    }

    /// Create an inverter state sensor.
    pub fn inverter_state(address: u16, name: &str) -> Self {
        Self::new(vec![address], name, "", 1.0).with_kind(SensorKind::InverterState)
    }

    /// Create an SD status sensor.
    pub fn sd_status(address: u16, name: &str) -> Self {
        Self::new(vec![address], name, "", 1.0).with_kind(SensorKind::SdStatus)
    }

    /// Create a math sensor: `sum(factors[i] * value_at(address[i]))`.
    pub fn math(address: impl Into<Vec<u16>>, name: &str, unit: &str, factors: &[f64]) -> Self {
        Self::new(address, name, unit, 1.0).with_kind(SensorKind::Math {
            factors: factors.to_vec(),
            absolute: false,
            no_negative: false,
        })
    }

    /// Create a writable numeric setting.
    pub fn number(address: u16, name: &str, unit: &str, factor: f64, min: f64, max: f64) -> Self {
        Self::new(vec![address], name, unit, factor).with_kind(SensorKind::Number { min, max })
    }

    /// Create a writable enumerated setting.
    pub fn select(address: u16, name: &str, options: &[(u16, &str)]) -> Self {
        let options = options.iter().map(|(k, v)| (*k, v.to_string())).collect();
        Self::new(vec![address], name, "", 1.0).with_kind(SensorKind::Select { options })
    }

    /// Create a writable time-of-day setting.
    pub fn time(address: u16, name: &str) -> Self {
        Self::new(vec![address], name, "", 1.0).with_kind(SensorKind::Time)
    }

    /// Restrict writes to the given bits of the first register.
    #[must_use]
    pub fn with_bitmask(mut self, bitmask: u16) -> Self {
        self.bitmask = Some(bitmask);
        self
    }

    /// Take the magnitude of a math sensor's sum.
    #[must_use]
    pub fn absolute(mut self) -> Self {
        if let SensorKind::Math { absolute, .. } = &mut self.kind {
            *absolute = true;
        }
        self
    }

    /// Clamp a negative math sensor sum to zero.
    #[must_use]
    pub fn no_negative(mut self) -> Self {
        if let SensorKind::Math { no_negative, .. } = &mut self.kind {
            *no_negative = true;
        }
        self
    }

    fn with_kind(mut self, kind: SensorKind) -> Self {
        self.kind = kind;
        self
    }

    /// Whether the sensor is composed from other registers' values.
    #[inline]
    pub fn is_math(&self) -> bool {
        matches!(self.kind, SensorKind::Math { .. })
    }
}

/// Turn a display name into a sensor id: `"Non-Essential power"` ->
/// `"non_essential_power"`.
pub fn slug(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_sep = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Read-only collection of sensor definitions, looked up by id.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<Arc<Sensor>>,
    index: HashMap<String, usize>,
}

impl SensorCatalog {
    /// Build a catalog. Later duplicates of an id replace earlier ones.
    pub fn new(sensors: impl IntoIterator<Item = Sensor>) -> Self {
        let mut catalog = Self::default();
        for sensor in sensors {
            match catalog.index.get(&sensor.id) {
                Some(&idx) => catalog.sensors[idx] = Arc::new(sensor),
                None => {
                    catalog.index.insert(sensor.id.clone(), catalog.sensors.len());
                    catalog.sensors.push(Arc::new(sensor));
                }
            }
        }
        catalog
    }

    /// Look up a sensor by id.
    pub fn get(&self, id: &str) -> Option<&Arc<Sensor>> {
        self.index.get(id).map(|&idx| &self.sensors[idx])
    }

    /// Iterate in definition order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Sensor>> {
        self.sensors.iter()
    }

    /// Number of sensors.
    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    /// Check if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    /// Resolve a list of ids. An empty list selects every sensor.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> crate::core::Result<Vec<Arc<Sensor>>> {
        if ids.is_empty() {
            return Ok(self.sensors.clone());
        }
        ids.iter()
            .map(|id| {
                self.get(id.as_ref())
                    .cloned()
                    .ok_or_else(|| crate::core::InverterError::UnknownSensor(id.as_ref().into()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("Battery SOC"), "battery_soc");
        assert_eq!(slug("Non-Essential power"), "non_essential_power");
        assert_eq!(slug("PV1 power"), "pv1_power");
        assert_eq!(slug("  Prog1 Time "), "prog1_time");
    }

    #[test]
    fn test_math_builder_flags() {
        let s = Sensor::math(vec![175, 169, 166], "Essential power", units::WATT, &[1.0, 1.0, -1.0])
            .absolute();
        assert!(s.is_math());
        assert_eq!(
            s.kind,
            SensorKind::Math {
                factors: vec![1.0, 1.0, -1.0],
                absolute: true,
                no_negative: false,
            }
        );
        // flags are ignored on non-math sensors
        let p = Sensor::new(vec![1], "x", "", 1.0).absolute();
        assert_eq!(p.kind, SensorKind::Plain);
    }

    #[test]
    fn test_catalog_lookup_and_select() {
        let catalog = SensorCatalog::new(vec![
            Sensor::new(vec![184], "Battery SOC", units::PERCENT, 1.0),
            Sensor::new(vec![183], "Battery voltage", units::VOLT, 0.01),
        ]);

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get("battery_soc").map(|s| s.address.clone()), Some(vec![184]));
        assert_eq!(catalog.select::<&str>(&[]).unwrap().len(), 2);
        assert_eq!(catalog.select(&["battery_voltage"]).unwrap()[0].id, "battery_voltage");
        assert!(matches!(
            catalog.select(&["nope"]),
            Err(crate::core::InverterError::UnknownSensor(_))
        ));
    }

    #[test]
    fn test_writable_kinds() {
        assert!(Sensor::time(250, "Prog1 Time").kind.is_writable());
        assert!(!Sensor::serial(vec![3, 4], "Serial").kind.is_writable());
        assert!(!Sensor::math(vec![1], "m", "", &[1.0]).kind.is_writable());
        assert!(!Sensor::new(vec![184], "Battery SOC", units::PERCENT, 1.0).kind.is_writable());
        assert!(!Sensor::temperature(182, "Battery temperature", 0.1).kind.is_writable());
    }
}
