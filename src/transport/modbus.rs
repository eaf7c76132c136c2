//! Modbus TCP transport.
//!
//! Wraps `voltage_modbus::ModbusTcpClient` behind [`RegisterTransport`]. The
//! inverter's RS485 port is expected behind a Modbus TCP gateway (mbusd, a
//! USR-TCP232 adapter or similar).
//!
//! # Example
//!
//! ```rust,ignore
//! use sunsynk_gw::transport::{ModbusTcpConfig, ModbusTcpTransport};
//!
//! let config = ModbusTcpConfig::new("192.168.1.100:502")
//!     .with_server_id(1)
//!     .with_connect_timeout(Duration::from_secs(5));
//!
//! let mut transport = ModbusTcpTransport::new(config);
//! transport.connect().await?;
//! ```

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use voltage_modbus::{ModbusClient, ModbusTcpClient};

use crate::core::error::{InverterError, Result};
use crate::core::traits::RegisterTransport;

/// Modbus TCP connection settings.
#[derive(Debug, Clone)]
pub struct ModbusTcpConfig {
    /// Gateway address (e.g., "192.168.1.100:502")
    pub address: String,

    /// Modbus server (slave) id of the inverter
    pub server_id: u8,

    /// Connection timeout
    pub connect_timeout: Duration,
}

impl ModbusTcpConfig {
    /// Create a configuration for server id 1.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            server_id: 1,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set the server id.
    pub fn with_server_id(mut self, server_id: u8) -> Self {
        self.server_id = server_id;
        self
    }

    /// Set connection timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Register transport over Modbus TCP.
pub struct ModbusTcpTransport {
    config: ModbusTcpConfig,
    client: Option<ModbusTcpClient>,
}

impl ModbusTcpTransport {
    /// Create a disconnected transport.
    pub fn new(config: ModbusTcpConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Connection settings.
    pub fn config(&self) -> &ModbusTcpConfig {
        &self.config
    }

    fn client(&mut self) -> Result<&mut ModbusTcpClient> {
        self.client.as_mut().ok_or(InverterError::NotConnected)
    }
}

#[async_trait]
impl RegisterTransport for ModbusTcpTransport {
    fn name(&self) -> &'static str {
        "modbus_tcp"
    }

    async fn connect(&mut self) -> Result<()> {
        let client =
            ModbusTcpClient::from_address(&self.config.address, self.config.connect_timeout)
                .await
                .map_err(|e| {
                    InverterError::Transport(format!("{}: {}", self.config.address, e))
                })?;
        debug!("Modbus TCP connected to {}", self.config.address);
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut client) = self.client.take() {
            let _ = client.close().await;
        }
        Ok(())
    }

    async fn read_holding_registers(&mut self, start: u16, count: u16) -> Result<Vec<u16>> {
        let server_id = self.config.server_id;
        self.client()?
            .read_03(server_id, start, count)
            .await
            .map_err(|e| InverterError::Transport(e.to_string()))
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<bool> {
        let server_id = self.config.server_id;
        self.client()?
            .write_10(server_id, address, &[value])
            .await
            .map(|_| true)
            .map_err(|e| InverterError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_builder() {
        let config = ModbusTcpConfig::new("10.0.0.5:502")
            .with_server_id(3)
            .with_connect_timeout(Duration::from_millis(250));
        assert_eq!(config.address, "10.0.0.5:502");
        assert_eq!(config.server_id, 3);
        assert_eq!(config.connect_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_requires_connect() {
        let mut transport = ModbusTcpTransport::new(ModbusTcpConfig::new("127.0.0.1:1"));
        assert_eq!(transport.name(), "modbus_tcp");
        assert!(matches!(
            transport.read_holding_registers(0, 1).await,
            Err(InverterError::NotConnected)
        ));
        assert!(matches!(
            transport.write_register(0, 1).await,
            Err(InverterError::NotConnected)
        ));
    }
}
