//! Register state store.
//!
//! Last-known raw word per register address plus the set of sensors the poll
//! cycle is interested in. Mutated only through the owning
//! [`Session`](crate::engine::Session).
//!
//! # Design
//!
//! - **Registers**: `BTreeMap<u16, u16>`; an address is present only after a
//!   read or write touched it, entries are never removed
//! - **Tracked sensors**: `Vec` + `id -> index` map, built incrementally and
//!   iterated in tracking order
//! - **Values**: each tracked sensor caches its last decoded value; plain kinds
//!   are decoded before math kinds so math terms see the same cycle

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::codec;
use crate::core::data::{SensorReading, Value, ValueBatch};
use crate::core::error::Result;
use crate::core::sensor::{Sensor, SensorKind};

/// A tracked sensor and its last decoded value.
#[derive(Debug, Clone)]
pub struct TrackedSensor {
    /// Sensor definition.
    pub sensor: Arc<Sensor>,
    /// Last decoded value, `None` until all its registers were seen.
    pub value: Option<Value>,
}

/// Process-lifetime register cache.
#[derive(Debug, Default)]
pub struct RegisterState {
    registers: BTreeMap<u16, u16>,
    tracked: Vec<TrackedSensor>,
    index: HashMap<String, usize>,
}

impl RegisterState {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // ========== registers ==========

    /// Last raw word at `address`.
    #[inline]
    pub fn register(&self, address: u16) -> Option<u16> {
        self.registers.get(&address).copied()
    }

    /// Raw words for every address, or `None` if any was never seen.
    pub fn registers_for(&self, addresses: &[u16]) -> Option<Vec<u16>> {
        addresses.iter().map(|a| self.register(*a)).collect()
    }

    /// Upsert raw words.
    pub fn update<I>(&mut self, words: I)
    where
        I: IntoIterator<Item = (u16, u16)>,
    {
        self.registers.extend(words);
    }

    /// Iterate over all known registers in address order.
    pub fn registers(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.registers.iter().map(|(a, v)| (*a, *v))
    }

    /// Number of known registers.
    pub fn register_count(&self) -> usize {
        self.registers.len()
    }

    // ========== tracked sensors ==========

    /// Start tracking a sensor. Returns `false` if it already was.
    pub fn track(&mut self, sensor: Arc<Sensor>) -> bool {
        if self.index.contains_key(&sensor.id) {
            return false;
        }
        self.index.insert(sensor.id.clone(), self.tracked.len());
        self.tracked.push(TrackedSensor {
            sensor,
            value: None,
        });
        true
    }

    /// Check if a sensor id is tracked.
    #[inline]
    pub fn is_tracked(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// Look up a tracked sensor.
    pub fn get(&self, id: &str) -> Option<&TrackedSensor> {
        self.index.get(id).map(|&idx| &self.tracked[idx])
    }

    /// Tracked sensor definitions, in tracking order.
    pub fn tracked_sensors(&self) -> Vec<Arc<Sensor>> {
        self.tracked.iter().map(|t| t.sensor.clone()).collect()
    }

    /// Number of tracked sensors.
    pub fn tracked_count(&self) -> usize {
        self.tracked.len()
    }

    /// Last decoded value of a tracked sensor.
    pub fn value(&self, id: &str) -> Option<&Value> {
        self.get(id).and_then(|t| t.value.as_ref())
    }

    /// Readings for every tracked sensor that has a value.
    pub fn values(&self) -> ValueBatch {
        self.tracked
            .iter()
            .filter_map(|t| {
                t.value
                    .as_ref()
                    .map(|v| SensorReading::new(&t.sensor.id, v.clone(), &t.sensor.unit))
            })
            .collect()
    }

    // ========== decoding ==========

    /// Decode a sensor from the cached registers.
    ///
    /// Returns `Ok(None)` when a register it needs was never read.
    pub fn decode(&self, sensor: &Sensor) -> Result<Option<Value>> {
        if let SensorKind::Math { .. } = sensor.kind {
            let Some(terms) = self.math_terms(sensor) else {
                return Ok(None);
            };
            return codec::decode_math(sensor, &terms).map(Some);
        }
        match self.registers_for(&sensor.address) {
            Some(regs) => codec::decode(sensor, &regs).map(Some),
            None => Ok(None),
        }
    }

    /// Re-decode every tracked sensor, plain kinds first then math kinds.
    ///
    /// Returns the number of sensors holding a value afterwards.
    pub fn refresh_values(&mut self) -> usize {
        for pass_math in [false, true] {
            for idx in 0..self.tracked.len() {
                let sensor = self.tracked[idx].sensor.clone();
                if sensor.is_math() != pass_math {
                    continue;
                }
                match self.decode(&sensor) {
                    Ok(Some(value)) => self.tracked[idx].value = Some(value),
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Decode {} failed: {}", sensor.id, e),
                }
            }
        }
        self.tracked.iter().filter(|t| t.value.is_some()).count()
    }

    /// Term for each address of a math sensor: the decoded value of a tracked
    /// single-register numeric sensor at that address, else the signed raw
    /// word.
    fn math_terms(&self, sensor: &Sensor) -> Option<Vec<f64>> {
        sensor
            .address
            .iter()
            .map(|&address| {
                self.term_from_tracked(address)
                    .or_else(|| self.register(address).map(codec::raw_math_term))
            })
            .collect()
    }

    fn term_from_tracked(&self, address: u16) -> Option<f64> {
        self.tracked
            .iter()
            .filter(|t| t.sensor.kind.is_numeric() && t.sensor.address == [address])
            .find_map(|t| t.value.as_ref().and_then(Value::as_f64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::sensor::units;

    fn arc(sensor: Sensor) -> Arc<Sensor> {
        Arc::new(sensor)
    }

    #[test]
    fn test_registers_appear_only_after_update() {
        let mut state = RegisterState::new();
        assert_eq!(state.register(184), None);
        assert_eq!(state.registers_for(&[183, 184]), None);

        state.update([(183, 5200), (184, 87)]);
        assert_eq!(state.register(184), Some(87));
        assert_eq!(state.registers_for(&[183, 184]), Some(vec![5200, 87]));
        assert_eq!(state.register_count(), 2);

        state.update([(184, 88)]);
        assert_eq!(state.register(184), Some(88));
        assert_eq!(state.register_count(), 2);
    }

    #[test]
    fn test_track_is_idempotent() {
        let mut state = RegisterState::new();
        let soc = arc(Sensor::new(vec![184], "Battery SOC", units::PERCENT, 1.0));
        assert!(state.track(soc.clone()));
        assert!(!state.track(soc));
        assert_eq!(state.tracked_count(), 1);
        assert!(state.is_tracked("battery_soc"));
        assert!(!state.is_tracked("battery_voltage"));
    }

    #[test]
    fn test_refresh_decodes_tracked_sensors() {
        let mut state = RegisterState::new();
        state.track(arc(Sensor::new(vec![183], "Battery voltage", units::VOLT, 0.01)));
        state.track(arc(Sensor::new(vec![190], "Battery power", units::WATT, -1.0)));

        assert_eq!(state.refresh_values(), 0);
        assert!(state.values().is_empty());

        state.update([(183, 5321), (190, 0xFFF6)]);
        assert_eq!(state.refresh_values(), 2);
        assert_eq!(state.value("battery_voltage"), Some(&Value::Float(53.21)));
        assert_eq!(state.value("battery_power"), Some(&Value::Integer(-10)));

        let batch = state.values();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.get("battery_voltage").map(|r| r.unit.as_str()), Some("V"));
    }

    #[test]
    fn test_math_uses_decoded_values_of_same_cycle() {
        let mut state = RegisterState::new();
        // math sensor tracked first, still evaluated after the plain ones
        state.track(arc(
            Sensor::math(vec![160, 161], "Grid current", units::AMPS, &[1.0, 1.0]),
        ));
        state.track(arc(Sensor::new(vec![160], "Grid L1 current", units::AMPS, 0.01)));
        state.track(arc(Sensor::new(vec![161], "Grid L2 current", units::AMPS, 0.01)));

        state.update([(160, 250), (161, 125)]);
        state.refresh_values();
        assert_eq!(state.value("grid_current"), Some(&Value::Float(3.75)));
    }

    #[test]
    fn test_math_falls_back_to_signed_raw() {
        let mut state = RegisterState::new();
        state.track(arc(
            Sensor::math(vec![175, 169, 166], "Essential power", units::WATT, &[1.0, 1.0, -1.0])
                .absolute(),
        ));
        state.update([(175, 500), (169, 300), (166, 50)]);
        state.refresh_values();
        assert_eq!(state.value("essential_power"), Some(&Value::Float(750.0)));

        state.update([(175, (-900i16) as u16), (169, 0), (166, 100)]);
        state.refresh_values();
        assert_eq!(state.value("essential_power"), Some(&Value::Float(1000.0)));
    }

    #[test]
    fn test_math_no_negative_clamps() {
        let mut state = RegisterState::new();
        state.track(arc(
            Sensor::math(vec![172, 167], "Non-Essential power", units::WATT, &[1.0, -1.0])
                .no_negative(),
        ));
        state.update([(172, 100), (167, 400)]);
        state.refresh_values();
        assert_eq!(state.value("non_essential_power"), Some(&Value::Float(0.0)));
    }

    #[test]
    fn test_math_waits_for_all_registers() {
        let mut state = RegisterState::new();
        let math = Sensor::math(vec![172, 167], "Non-Essential power", units::WATT, &[1.0, -1.0]);
        state.update([(172, 100)]);
        assert_eq!(state.decode(&math).unwrap(), None);
    }

    #[test]
    fn test_decode_untracked_sensor() {
        let mut state = RegisterState::new();
        state.update([(3, 0x4142), (4, 0x4300)]);
        let serial = Sensor::serial(vec![3, 4], "Serial");
        assert_eq!(
            state.decode(&serial).unwrap(),
            Some(Value::String("ABC".into()))
        );
    }
}
