//! TOML configuration.
//!
//! # Example
//!
//! ```toml
//! [inverter]
//! driver = "modbus_tcp"
//! address = "192.168.1.100:502"
//! server_id = 1
//! read_sensors_batch_size = 60
//!
//! [polling]
//! interval_ms = 2000
//! max_consecutive_failures = 3
//! sensors = ["battery_soc", "grid_power", "essential_power"]
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::error::{InverterError, Result};
use crate::core::sensor::{Sensor, SensorCatalog};
use crate::definitions::SENSORS_5KW;
use crate::engine::{EngineConfig, RetryPolicy, DEFAULT_BATCH_SIZE, MAX_BATCH_SIZE};

/// Example configuration printed by `sunsynk-gw example`.
pub const EXAMPLE_CONFIG: &str = r#"[inverter]
# "modbus_tcp" or "simulated"
driver = "modbus_tcp"
address = "192.168.1.100:502"
server_id = 1
connect_timeout_ms = 5000
io_timeout_ms = 3000
read_sensors_batch_size = 60
inter_request_delay_ms = 1

[polling]
interval_ms = 2000
max_consecutive_failures = 3
retry_single = true
# empty: every catalog sensor
sensors = ["battery_soc", "battery_power", "grid_power", "essential_power", "pv1_power"]
"#;

/// Transport driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Driver {
    /// Modbus TCP gateway in front of the RS485 port.
    #[default]
    ModbusTcp,
    /// In-memory register bank.
    Simulated,
}

/// `[inverter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InverterConfig {
    #[serde(default)]
    pub driver: Driver,

    /// Gateway address (host:port).
    #[serde(default = "default_address")]
    pub address: String,

    /// Modbus server id.
    #[serde(default = "default_server_id")]
    pub server_id: u8,

    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,

    /// Registers per batched read (1..=125).
    #[serde(default = "default_batch_size")]
    pub read_sensors_batch_size: u16,

    #[serde(default = "default_inter_request_delay_ms")]
    pub inter_request_delay_ms: u64,
}

impl Default for InverterConfig {
    fn default() -> Self {
        Self {
            driver: Driver::default(),
            address: default_address(),
            server_id: default_server_id(),
            connect_timeout_ms: default_connect_timeout_ms(),
            io_timeout_ms: default_io_timeout_ms(),
            read_sensors_batch_size: default_batch_size(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
        }
    }
}

impl InverterConfig {
    /// Connection timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Engine settings derived from this section.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig::default()
            .with_batch_size(self.read_sensors_batch_size)
            .with_io_timeout(Duration::from_millis(self.io_timeout_ms))
            .with_inter_request_delay(Duration::from_millis(self.inter_request_delay_ms))
    }
}

/// `[polling]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Failed cycles tolerated before polling stops.
    #[serde(default = "default_max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    /// Retry sensors one by one after a failed cycle.
    #[serde(default = "default_true")]
    pub retry_single: bool,

    /// Sensor ids to poll; empty polls the whole catalog.
    #[serde(default)]
    pub sensors: Vec<String>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_consecutive_failures: default_max_consecutive_failures(),
            retry_single: true,
            sensors: Vec::new(),
        }
    }
}

impl PollingConfig {
    /// Poll interval.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Retry policy derived from this section.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_consecutive_failures: self.max_consecutive_failures,
            retry_single: self.retry_single,
        }
    }
}

/// Complete configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub inverter: InverterConfig,

    #[serde(default)]
    pub polling: PollingConfig,
}

impl Config {
    /// Read and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            InverterError::config(format!("Cannot read {}: {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges and sensor ids.
    pub fn validate(&self) -> Result<()> {
        let batch = self.inverter.read_sensors_batch_size;
        if !(1..=MAX_BATCH_SIZE).contains(&batch) {
            return Err(InverterError::config(format!(
                "read_sensors_batch_size must be 1..={}, got {}",
                MAX_BATCH_SIZE, batch
            )));
        }
        if self.inverter.io_timeout_ms == 0 {
            return Err(InverterError::config("io_timeout_ms must be > 0"));
        }
        if self.inverter.driver == Driver::ModbusTcp && self.inverter.address.trim().is_empty() {
            return Err(InverterError::config("inverter.address is required"));
        }
        if self.polling.interval_ms == 0 {
            return Err(InverterError::config("interval_ms must be > 0"));
        }
        self.sensors(&SENSORS_5KW)?;
        Ok(())
    }

    /// Resolve `polling.sensors` against a catalog.
    pub fn sensors(&self, catalog: &SensorCatalog) -> Result<Vec<Arc<Sensor>>> {
        catalog.select(&self.polling.sensors).map_err(|e| match e {
            InverterError::UnknownSensor(id) => {
                InverterError::config(format!("Unknown sensor in polling.sensors: {}", id))
            }
            other => other,
        })
    }
}

fn default_address() -> String {
    "127.0.0.1:502".to_string()
}

fn default_server_id() -> u8 {
    1
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_io_timeout_ms() -> u64 {
    3000
}

fn default_batch_size() -> u16 {
    DEFAULT_BATCH_SIZE
}

fn default_inter_request_delay_ms() -> u64 {
    1
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_max_consecutive_failures() -> u32 {
    3
}

fn default_true() -> bool {
    true
}
