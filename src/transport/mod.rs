//! Transport adapters.
//!
//! Implementations of [`RegisterTransport`](crate::core::RegisterTransport):
//!
//! - `modbus`: Modbus TCP via `voltage_modbus` (feature `modbus-tcp`)
//! - `simulated`: in-memory register bank for tests and dry runs

#[cfg(feature = "modbus-tcp")]
pub mod modbus;

pub mod simulated;

#[cfg(feature = "modbus-tcp")]
pub use modbus::{ModbusTcpConfig, ModbusTcpTransport};

pub use simulated::{SimulatedFault, SimulatedTransport};
