//! Core abstractions for the register access engine.
//!
//! This module provides the error type, decoded value model, sensor
//! definitions and the transport boundary.

pub mod data;
pub mod error;
pub mod logging;
pub mod sensor;
pub mod traits;

pub use data::*;
pub use error::{InverterError, Result};
pub use sensor::*;
pub use traits::*;
