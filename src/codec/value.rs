//! Register <-> value transforms.
//!
//! Decoding dispatches on [`SensorKind`]; math sensors are evaluated
//! separately through [`decode_math`] once every referenced register has been
//! decoded. Encoding is the inverse of the numeric scaling and is only defined
//! for writable kinds.

use crate::core::data::Value;
use crate::core::error::{InverterError, Result};
use crate::core::sensor::{Sensor, SensorKind};

/// Calibration offset subtracted from temperature readings (°C).
pub const TEMPERATURE_OFFSET: f64 = 100.0;

/// Most registers a numeric sensor may span.
pub const MAX_NUMERIC_REGISTERS: usize = 4;

/// Known fault codes, keyed by fault number (`F01` = bit 0 of the first
/// register).
const FAULTS: &[(u32, &str)] = &[
    (13, "Working mode change"),
    (18, "AC over current fault of hardware"),
    (20, "DC over current fault of the hardware"),
    (22, "Emergency stop fault"),
    (23, "AC leakage current is transient over current"),
    (24, "DC insulation impedance failure"),
    (26, "The DC busbar is unbalanced"),
    (29, "Parallel comms cable"),
    (35, "No AC grid"),
    (42, "AC line low voltage"),
    (47, "AC frequency high/low"),
    (56, "DC busbar voltage low"),
    (63, "ARC fault"),
    (64, "Heat sink temperature failure"),
];

const INVERTER_STATES: &[(u16, &str)] = &[
    (0, "standby"),
    (1, "selftest"),
    (2, "ok"),
    (3, "alarm"),
    (4, "fault"),
    (5, "activating"),
];

const SD_STATES: &[(u16, &str)] = &[(1000, "fault"), (2000, "ok")];

/// Interpret a raw word as 16-bit two's complement.
#[inline]
pub fn signed16(raw: u16) -> i64 {
    raw as i16 as i64
}

/// Interpret a combined double word as 32-bit two's complement.
#[inline]
pub fn signed32(raw: u32) -> i64 {
    raw as i32 as i64
}

/// Round to two decimals.
#[inline]
pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Combine registers least significant word first: `reg[0] | reg[1] << 16 ...`.
pub fn combine_registers(regs: &[u16]) -> Result<u64> {
    if regs.is_empty() {
        return Err(InverterError::invalid_data("No registers to combine"));
    }
    if regs.len() > MAX_NUMERIC_REGISTERS {
        return Err(InverterError::invalid_data(format!(
            "Cannot combine {} registers (max {})",
            regs.len(),
            MAX_NUMERIC_REGISTERS
        )));
    }
    Ok(regs
        .iter()
        .enumerate()
        .fold(0u64, |acc, (i, &r)| acc | (r as u64) << (16 * i)))
}

/// Replace the `mask` bits of `current` with those of `new`, leaving every
/// other bit untouched.
#[inline]
pub fn patch_bitmask(current: u16, new: u16, mask: u16) -> u16 {
    (current & !mask) | (new & mask)
}

/// Decode the raw words of a non-math sensor.
///
/// `regs` must hold one word per sensor address, in address-list order.
pub fn decode(sensor: &Sensor, regs: &[u16]) -> Result<Value> {
    if regs.len() != sensor.address.len() {
        return Err(InverterError::invalid_data(format!(
            "{}: expected {} registers, got {}",
            sensor.id,
            sensor.address.len(),
            regs.len()
        )));
    }

    match &sensor.kind {
        SensorKind::Plain | SensorKind::Number { .. } => decode_number(sensor, regs),
        SensorKind::Temperature => {
            let v = decode_number(sensor, regs)?
                .as_f64()
                .ok_or_else(|| InverterError::invalid_data("Temperature is not numeric"))?;
            Ok(Value::Float(round2(v - TEMPERATURE_OFFSET)))
        }
        SensorKind::Serial => Ok(Value::String(decode_serial(regs))),
        SensorKind::Fault => Ok(Value::String(decode_faults(regs))),
        SensorKind::InverterState => Ok(Value::String(lookup(INVERTER_STATES, regs[0]))),
        SensorKind::SdStatus => Ok(Value::String(lookup(SD_STATES, regs[0]))),
        SensorKind::Select { options } => {
            let raw = sensor.bitmask.map_or(regs[0], |m| regs[0] & m);
            let label = options
                .iter()
                .find(|(k, _)| *k == raw)
                .map(|(_, v)| v.clone())
                .unwrap_or_else(|| format!("unknown ({})", raw));
            Ok(Value::String(label))
        }
        SensorKind::Time => Ok(Value::String(format!(
            "{:02}:{:02}",
            regs[0] / 100,
            regs[0] % 100
        ))),
        SensorKind::Math { .. } => Err(InverterError::invalid_data(format!(
            "{}: math sensors are decoded from terms",
            sensor.id
        ))),
    }
}

/// Evaluate a math sensor from the decoded values of its addresses.
pub fn decode_math(sensor: &Sensor, terms: &[f64]) -> Result<Value> {
    let SensorKind::Math {
        factors,
        absolute,
        no_negative,
    } = &sensor.kind
    else {
        return Err(InverterError::invalid_data(format!(
            "{} is not a math sensor",
            sensor.id
        )));
    };

    if terms.len() != factors.len() {
        return Err(InverterError::invalid_data(format!(
            "{}: expected {} terms, got {}",
            sensor.id,
            factors.len(),
            terms.len()
        )));
    }

    let mut sum: f64 = terms.iter().zip(factors).map(|(t, f)| t * f).sum();
    if *absolute {
        sum = sum.abs();
    }
    if *no_negative && sum < 0.0 {
        sum = 0.0;
    }
    Ok(Value::Float(round2(sum)))
}

/// Term used by a math sensor for an address no numeric sensor decodes.
#[inline]
pub fn raw_math_term(raw: u16) -> f64 {
    signed16(raw) as f64
}

fn decode_number(sensor: &Sensor, regs: &[u16]) -> Result<Value> {
    let raw = combine_registers(regs)?;
    let n = if sensor.factor < 0.0 {
        match regs.len() {
            1 => signed16(raw as u16),
            2 => signed32(raw as u32),
            _ => raw as i64,
        }
    } else {
        raw as i64
    };

    let scale = sensor.factor.abs();
    if scale == 1.0 {
        Ok(Value::Integer(n))
    } else {
        Ok(Value::Float(round2(n as f64 * scale)))
    }
}

fn decode_serial(regs: &[u16]) -> String {
    let mut s = String::with_capacity(regs.len() * 2);
    for &reg in regs {
        for byte in [(reg >> 8) as u8, (reg & 0xFF) as u8] {
            if byte != 0 {
                s.push(char::from(byte));
            }
        }
    }
    s
}

fn decode_faults(regs: &[u16]) -> String {
    let mut faults = Vec::new();
    for (word, &reg) in regs.iter().enumerate() {
        for bit in 0..16u32 {
            if reg & (1 << bit) == 0 {
                continue;
            }
            let code = word as u32 * 16 + bit + 1;
            match FAULTS.iter().find(|(c, _)| *c == code) {
                Some((_, desc)) => faults.push(format!("F{:02} {}", code, desc)),
                None => faults.push(format!("F{:02}", code)),
            }
        }
    }
    faults.join(", ")
}

fn lookup(table: &[(u16, &str)], raw: u16) -> String {
    table
        .iter()
        .find(|(k, _)| *k == raw)
        .map(|(_, v)| v.to_string())
        .unwrap_or_else(|| format!("unknown ({})", raw))
}

/// Encode a value into one raw word per sensor address.
///
/// Bitmask handling is left to the caller, which must merge the first word
/// into the register's current content.
pub fn encode(sensor: &Sensor, value: &Value) -> Result<Vec<u16>> {
    match &sensor.kind {
        SensorKind::Plain => encode_number(sensor, expect_number(sensor, value)?),
        SensorKind::Temperature => {
            encode_number(sensor, expect_number(sensor, value)? + TEMPERATURE_OFFSET)
        }
        SensorKind::Number { min, max } => {
            let v = expect_number(sensor, value)?;
            if v < *min || v > *max {
                return Err(InverterError::invalid_value(format!(
                    "{}: {} outside [{}, {}]",
                    sensor.id, v, min, max
                )));
            }
            encode_number(sensor, v)
        }
        SensorKind::Select { options } => encode_select(sensor, options, value).map(|r| vec![r]),
        SensorKind::Time => encode_time(sensor, value).map(|r| vec![r]),
        _ => Err(InverterError::ReadOnly(sensor.id.clone())),
    }
}

/// Keep only the bits a bitmask sensor owns, warning about anything outside.
pub fn check_bitmask(sensor: &Sensor, mask: u16, encoded: u16) -> u16 {
    if encoded & !mask != 0 {
        tracing::warn!(
            "{}: value {:#06x} has bits outside mask {:#06x}, dropping them",
            sensor.id,
            encoded,
            mask
        );
    }
    encoded & mask
}

fn expect_number(sensor: &Sensor, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| {
            InverterError::invalid_value(format!("{} expects a number, got '{}'", sensor.id, value))
        })
}

fn encode_number(sensor: &Sensor, v: f64) -> Result<Vec<u16>> {
    let scale = sensor.factor.abs();
    if scale == 0.0 {
        return Err(InverterError::invalid_value(format!(
            "{}: zero scale factor",
            sensor.id
        )));
    }

    let words = sensor.address.len();
    if words == 0 || words > MAX_NUMERIC_REGISTERS {
        return Err(InverterError::invalid_value(format!(
            "{}: cannot encode into {} registers",
            sensor.id, words
        )));
    }

    let raw = (v / scale).round() as i128;
    let bits = 16 * words as u32;
    let (lo, hi) = if sensor.factor < 0.0 {
        (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
    } else {
        (0, (1i128 << bits) - 1)
    };
    if raw < lo || raw > hi {
        return Err(InverterError::invalid_value(format!(
            "{}: {} does not fit {} register(s)",
            sensor.id, v, words
        )));
    }

    Ok((0..words)
        .map(|i| ((raw >> (16 * i)) & 0xFFFF) as u16)
        .collect())
}

fn encode_select(sensor: &Sensor, options: &[(u16, String)], value: &Value) -> Result<u16> {
    let found = match value {
        Value::String(label) => options
            .iter()
            .find(|(_, v)| v.eq_ignore_ascii_case(label.trim()))
            .map(|(k, _)| *k),
        other => other
            .as_i64()
            .and_then(|raw| options.iter().find(|(k, _)| i64::from(*k) == raw))
            .map(|(k, _)| *k),
    };

    found.ok_or_else(|| {
        let labels: Vec<&str> = options.iter().map(|(_, v)| v.as_str()).collect();
        InverterError::invalid_value(format!(
            "{}: '{}' is not one of {:?}",
            sensor.id, value, labels
        ))
    })
}

fn encode_time(sensor: &Sensor, value: &Value) -> Result<u16> {
    let invalid = || {
        InverterError::invalid_value(format!("{}: expected HH:MM, got '{}'", sensor.id, value))
    };

    let (hours, minutes) = match value {
        Value::String(s) => {
            let (h, m) = s.trim().split_once(':').ok_or_else(invalid)?;
            let h: u16 = h.parse().map_err(|_| invalid())?;
            let m: u16 = m.parse().map_err(|_| invalid())?;
            (h, m)
        }
        other => {
            let raw = other.as_i64().filter(|r| (0..=2359).contains(r)).ok_or_else(invalid)?;
            ((raw / 100) as u16, (raw % 100) as u16)
        }
    };

    if hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    Ok(hours * 100 + minutes)
}
