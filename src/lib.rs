//! # Sunsynk Gateway (sunsynk-gw)
//!
//! Register access engine for Sunsynk / Deye hybrid solar inverters.
//!
//! ## Features
//!
//! - **Batched Reads**: sparse sensor addresses packed into minimal FC03 spans
//! - **Typed Decoding**: signed, multi-register, temperature, serial, fault,
//!   state and derived (math) sensors
//! - **Safe Writes**: bitmask read-modify-write preserves sibling settings
//! - **Self-healing Polling**: bounded retries, escalation to a supervisor
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sunsynk_gw::prelude::*;
//! use sunsynk_gw::transport::{ModbusTcpConfig, ModbusTcpTransport};
//!
//! let transport = ModbusTcpTransport::new(ModbusTcpConfig::new("192.168.1.100:502"));
//! let mut session = Session::new(transport, EngineConfig::default());
//! session.connect().await?;
//!
//! session.track(SENSORS_5KW.select(&["battery_soc", "grid_power"])?);
//! session.read_tracked().await?;
//! println!("{:?}", session.value("battery_soc"));
//! ```
//!
//! ## Transports
//!
//! | Driver | Module | Feature |
//! |--------|--------|---------|
//! | Modbus TCP | `transport::modbus` (`voltage_modbus`) | `modbus-tcp` (default) |
//! | Simulated | `transport::simulated` | always |

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod config;
pub mod core;
pub mod definitions;
pub mod engine;
pub mod store;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::core::{
        data::*,
        error::{InverterError, Result},
        sensor::*,
        traits::*,
    };
    pub use crate::definitions::SENSORS_5KW;
    pub use crate::engine::{
        CycleOutcome, EngineConfig, PollDriver, ReadReport, RetryPolicy, Session, SharedSession,
        WriteReport, WriteRequest,
    };
    pub use crate::store::{MemoryStore, ValueEvent, ValueStore};
}

// Re-export core types at crate root for convenience
pub use crate::core::data::{SensorReading, Value, ValueBatch};
pub use crate::core::error::{InverterError, Result};
pub use crate::core::sensor::{Sensor, SensorCatalog, SensorKind};
pub use crate::core::traits::{ConnectionState, Diagnostics, RegisterTransport};

// Re-export engine and store types
pub use crate::engine::{PollDriver, RetryPolicy, Session};
pub use crate::store::{MemoryStore, ValueStore};
