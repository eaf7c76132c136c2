//! Error types for the register access engine.

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, InverterError>;

/// Unified error type.
///
/// Variants are split so the poll driver can tell a retryable I/O hiccup from a
/// condition that must stop polling.
#[derive(Debug, Error)]
pub enum InverterError {
    /// A transport call exceeded its bounded wait.
    #[error("Timeout reading/writing registers {start} (count {count})")]
    Timeout { start: u16, count: u16 },

    /// The device answered with fewer words than requested and the caller
    /// could not proceed without them.
    #[error("Short read at {start}: got {received}/{requested} registers")]
    ShortRead {
        start: u16,
        requested: u16,
        received: u16,
    },

    /// Too many consecutive whole-cycle read failures.
    #[error("Multiple Modbus read errors ({failures} consecutive): {last_error}")]
    Escalated { failures: u32, last_error: String },

    /// Error reported by the underlying Modbus client.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Operation attempted before `connect()`.
    #[error("Not connected")]
    NotConnected,

    /// The device refused a register write.
    #[error("Write rejected: register {address}={value}")]
    WriteRejected { address: u16, value: u16 },

    /// A value could not be encoded for the target sensor.
    #[error("Invalid value: {0}")]
    InvalidValue(String),

    /// Write attempted on a sensor that has no inverse transform.
    #[error("Sensor {0} is read-only")]
    ReadOnly(String),

    /// Sensor id not present in the catalog.
    #[error("Unknown sensor: {0}")]
    UnknownSensor(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Raw register data could not be decoded.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl InverterError {
    /// Shorthand for [`InverterError::InvalidData`].
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        Self::InvalidData(msg.into())
    }

    /// Shorthand for [`InverterError::InvalidValue`].
    pub fn invalid_value(msg: impl Into<String>) -> Self {
        Self::InvalidValue(msg.into())
    }

    /// Shorthand for [`InverterError::Config`].
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Transport(_) | Self::NotConnected
        )
    }

    /// Whether polling must stop and defer to an external supervisor.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Escalated { .. })
    }
}

impl From<toml::de::Error> for InverterError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<std::io::Error> for InverterError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(InverterError::Timeout { start: 1, count: 2 }.is_retryable());
        assert!(InverterError::NotConnected.is_retryable());
        assert!(!InverterError::ReadOnly("serial".into()).is_retryable());

        let fatal = InverterError::Escalated {
            failures: 4,
            last_error: "timeout".into(),
        };
        assert!(fatal.is_fatal());
        assert!(!fatal.is_retryable());
    }

    #[test]
    fn test_display() {
        let err = InverterError::ShortRead {
            start: 100,
            requested: 10,
            received: 4,
        };
        assert_eq!(err.to_string(), "Short read at 100: got 4/10 registers");
    }
}
