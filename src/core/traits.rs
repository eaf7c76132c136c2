//! Transport boundary and shared status types.
//!
//! The engine never frames Modbus requests itself. It talks to a
//! [`RegisterTransport`], which is responsible for the wire protocol (RTU/TCP
//! framing, CRC, function codes) and for the physical link.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::core::error::Result;

/// Connection state of a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Not connected to the inverter.
    #[default]
    Disconnected,

    /// Attempting to connect.
    Connecting,

    /// Connected and operational.
    Connected,

    /// Connection error state.
    Error,
}

impl ConnectionState {
    /// Check if currently connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Error",
        };
        write!(f, "{}", s)
    }
}

/// Register-level access to one inverter.
///
/// Implementations must allow only one outstanding request at a time; the
/// `&mut self` receivers enforce this for a single owner, and shared hosts wrap
/// the owning session in one mutex.
///
/// This trait uses `async_trait` because the CLI selects the driver at runtime
/// (`Box<dyn RegisterTransport>`).
#[async_trait]
pub trait RegisterTransport: Send {
    /// Short driver name for logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Open the link.
    async fn connect(&mut self) -> Result<()>;

    /// Close the link.
    async fn disconnect(&mut self) -> Result<()> {
        Ok(())
    }

    /// Read `count` holding registers starting at `start` (FC03).
    ///
    /// May return fewer words than requested.
    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>>;

    /// Write a single register. `Ok(false)` means the device refused it.
    async fn write_register(&mut self, address: u16, value: u16) -> Result<bool>;
}

#[async_trait]
impl<T: RegisterTransport + ?Sized> RegisterTransport for Box<T> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    async fn connect(&mut self) -> Result<()> {
        (**self).connect().await
    }

    async fn disconnect(&mut self) -> Result<()> {
        (**self).disconnect().await
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        (**self).read_holding_registers(start, count).await
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<bool> {
        (**self).write_register(address, value).await
    }
}

/// Session diagnostics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Transport driver name.
    pub transport: String,

    /// Connection state.
    pub connection_state: ConnectionState,

    /// Number of successful batched reads.
    pub read_count: u64,

    /// Number of successful register writes.
    pub write_count: u64,

    /// Number of failed transport calls (timeouts included).
    pub error_count: u64,

    /// Failed reads since the last successful `read_sensors`.
    pub consecutive_errors: u32,

    /// Last error message.
    pub last_error: Option<String>,

    /// Engine-specific information.
    #[serde(default)]
    pub extra: serde_json::Value,
}

impl Diagnostics {
    /// Create empty diagnostics for a transport.
    pub fn new(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
            connection_state: ConnectionState::Disconnected,
            read_count: 0,
            write_count: 0,
            error_count: 0,
            consecutive_errors: 0,
            last_error: None,
            extra: serde_json::Value::Null,
        }
    }
}
