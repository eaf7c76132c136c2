//! Sensor catalog for Sunsynk 5 kW / 8 kW single-phase hybrid inverters.
//!
//! Register addresses, scale factors and units as published for the Deye /
//! Sunsynk RS485 protocol. Two-register energy totals are listed least
//! significant word first.

use once_cell::sync::Lazy;

use crate::core::sensor::units::{AMPS, HERTZ, KWH, PERCENT, VOLT, WATT};
use crate::core::sensor::{Sensor, SensorCatalog};

/// Every known sensor and setting of the 5 kW family.
pub static SENSORS_5KW: Lazy<SensorCatalog> = Lazy::new(|| SensorCatalog::new(sensors_5kw()));

fn sensors_5kw() -> Vec<Sensor> {
    let mut all = Vec::with_capacity(96);

    // Battery
    all.extend([
        Sensor::temperature(182, "Battery temperature", 0.1),
        Sensor::new([183], "Battery voltage", VOLT, 0.01),
        Sensor::new([184], "Battery SOC", PERCENT, 1.0),
        Sensor::new([190], "Battery power", WATT, -1.0),
        Sensor::new([191], "Battery current", AMPS, -0.01),
    ]);

    // Inverter
    all.extend([
        Sensor::new([175], "Inverter power", WATT, -1.0),
        Sensor::new([154], "Inverter voltage", VOLT, 0.1),
        Sensor::new([193], "Inverter frequency", HERTZ, 0.01),
    ]);

    // Grid
    all.extend([
        Sensor::new([79], "Grid frequency", HERTZ, 0.01),
        Sensor::new([169], "Grid power", WATT, -1.0),
        Sensor::new([167], "Grid LD power", WATT, -1.0),
        Sensor::new([168], "Grid L2 power", WATT, -1.0),
        Sensor::new([150], "Grid voltage", VOLT, 0.1),
        Sensor::math([160, 161], "Grid current", AMPS, &[0.01, 0.01]),
        Sensor::new([172], "Grid CT power", WATT, -1.0),
        Sensor::new([194], "Grid Connected Status", "", 1.0),
    ]);

    // Load
    all.extend([
        Sensor::new([178], "Load power", WATT, -1.0),
        Sensor::new([176], "Load L1 power", WATT, -1.0),
        Sensor::new([177], "Load L2 power", WATT, -1.0),
    ]);

    // Solar
    all.extend([
        Sensor::new([186], "PV1 power", WATT, -1.0),
        Sensor::new([109], "PV1 voltage", VOLT, 0.1),
        Sensor::new([110], "PV1 current", AMPS, 0.1),
        Sensor::new([187], "PV2 power", WATT, -1.0),
        Sensor::new([111], "PV2 voltage", VOLT, 0.1),
        Sensor::new([112], "PV2 current", AMPS, 0.1),
    ]);

    // Power outputs
    all.extend([
        Sensor::new([166], "AUX power", WATT, -1.0),
        Sensor::math([175, 169, 166], "Essential power", WATT, &[1.0, 1.0, -1.0]).absolute(),
        Sensor::math([172, 167], "Non-Essential power", WATT, &[1.0, -1.0]).no_negative(),
    ]);

    // Energy
    all.extend([
        Sensor::new([60], "Day Active Energy", KWH, -0.1),
        Sensor::new([70], "Day Battery Charge", KWH, 0.1),
        Sensor::new([71], "Day Battery discharge", KWH, 0.1),
        Sensor::new([77], "Day Grid Export", KWH, 0.1),
        Sensor::new([76], "Day Grid Import", KWH, 0.1),
        Sensor::new([84], "Day Load Energy", KWH, 0.1),
        Sensor::new([108], "Day PV Energy", KWH, 0.1),
        Sensor::new([61], "Day Reactive Energy", "kVarh", -0.1),
        Sensor::new([67], "Month Grid Energy", KWH, 0.1),
        Sensor::new([66], "Month Load Energy", KWH, 0.1),
        Sensor::new([65], "Month PV Energy", KWH, 0.1),
        Sensor::new([63, 64], "Total Active Energy", KWH, 0.1),
        Sensor::new([72, 73], "Total Battery Charge", KWH, 0.1),
        Sensor::new([74, 75], "Total Battery Discharge", KWH, 0.1),
        Sensor::new([81, 82], "Total Grid Export", KWH, 0.1),
        Sensor::new([78, 80], "Total Grid Import", KWH, 0.1),
        Sensor::new([85, 86], "Total Load Energy", KWH, 0.1),
        Sensor::new([96, 97], "Total PV Energy", KWH, 0.1),
        Sensor::new([98, 99], "Year Grid Export", KWH, 0.1),
        Sensor::new([87, 88], "Year Load Energy", KWH, 0.1),
        Sensor::new([68, 69], "Year PV Energy", KWH, 0.1),
    ]);

    // General
    all.extend([
        Sensor::new([16, 17], "Rated power", WATT, 0.1),
        Sensor::serial([3, 4, 5, 6, 7], "Serial"),
        Sensor::new([0], "Device Type", "", 1.0),
        Sensor::fault([103, 104, 105, 106], "Fault"),
        Sensor::inverter_state(59, "Overall state"),
        Sensor::sd_status(92, "SD Status"),
        Sensor::temperature(90, "DC transformer temperature", 0.1),
        Sensor::temperature(95, "Environment temperature", 0.1),
        Sensor::temperature(91, "Radiator temperature", 0.1),
    ]);

    // Settings
    all.extend([
        Sensor::number(210, "Battery Max Charge Current", AMPS, 1.0, 0.0, 185.0),
        Sensor::number(211, "Battery Max Discharge Current", AMPS, 1.0, 0.0, 185.0),
        Sensor::select(243, "Priority Load", &[(0, "Battery first"), (1, "Load first")]),
        Sensor::select(
            244,
            "Load Limit",
            &[(0, "Allow Export"), (1, "Essentials"), (2, "Zero Export")],
        ),
        Sensor::select(247, "Solar Export", &[(0, "OFF"), (1, "ON")]),
        Sensor::time(250, "Prog1 Time"),
        Sensor::number(268, "Prog1 Capacity", PERCENT, 1.0, 0.0, 100.0),
        Sensor::select(
            274,
            "Prog1 charge",
            &[
                (0, "No Grid or Gen"),
                (1, "Allow Grid"),
                (2, "Allow Gen"),
                (3, "Allow Grid & Gen"),
            ],
        )
        .with_bitmask(0b11),
    ]);

    all
}
