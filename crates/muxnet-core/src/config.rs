//! Configuration types for muxnet
//!
//! This module provides configuration structures for the physical buses,
//! the per-module configuration EEPROM, and probe timing.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, warn};

use crate::address::{Fqa, MAX_ADDRESS, MAX_BUS, MAX_MODULE, MAX_SUBBUS};
use crate::error::{MuxnetError, Result};

/// Default base address of the first multiplexer (TCA9548A family)
pub const DEFAULT_MUX_BASE_ADDRESS: u8 = 0x70;

/// Default transport buffer size in bytes (Arduino `Wire` sizing)
pub const DEFAULT_BUFFER_SIZE: usize = 32;

/// Default identifier of the module configuration EEPROM
pub const DEFAULT_EEPROM_IDENTIFIER: &str = "eeprom";

/// Default 7-bit address of the module configuration EEPROM
pub const DEFAULT_EEPROM_ADDRESS: u8 = 0x50;

/// Default sub-bus of the module configuration EEPROM
pub const DEFAULT_EEPROM_SUBBUS: u8 = 0;

/// Default EEPROM capacity in bytes
pub const DEFAULT_EEPROM_CAPACITY: usize = 4000;

/// Smallest supported EEPROM capacity in bytes
pub const MIN_EEPROM_CAPACITY: usize = 100;

/// Largest supported EEPROM capacity in bytes
pub const MAX_EEPROM_CAPACITY: usize = 4000;

/// Default EEPROM page size in bytes
pub const DEFAULT_EEPROM_PAGE_SIZE: usize = 32;

/// Main configuration for a muxnet
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MuxnetConfig {
    /// Physical bus settings
    #[serde(default)]
    pub bus: BusConfig,

    /// Module configuration EEPROM settings
    #[serde(default)]
    pub eeprom: EepromConfig,

    /// Probe timing
    #[serde(default)]
    pub timing: TimingConfig,
}

impl MuxnetConfig {
    /// Parse a configuration from JSON text
    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: MuxnetConfig = serde_json::from_str(text)
            .map_err(|e| MuxnetError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "Loading muxnet configuration");
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Check every section for out-of-range values
    pub fn validate(&self) -> Result<()> {
        let result = self
            .bus
            .validate()
            .and_then(|()| self.eeprom.validate(&self.bus))
            .and_then(|()| self.timing.validate());
        if let Err(e) = &result {
            warn!(error = %e, code = e.error_code(), "Configuration rejected");
        }
        result
    }

    /// Address of the configuration EEPROM on a given module
    pub fn eeprom_fqa(&self, bus: u8, module: u8) -> Fqa {
        Fqa::encode(bus, module, self.eeprom.subbus, self.eeprom.address)
    }
}

/// Physical bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Number of physical buses (wires)
    #[serde(default = "default_wires")]
    pub wires: u8,

    /// Largest transfer the transport can buffer in one transaction
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Address of the multiplexer in module slot 0
    #[serde(default = "default_mux_base_address")]
    pub mux_base_address: u8,
}

fn default_wires() -> u8 {
    1
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

fn default_mux_base_address() -> u8 {
    DEFAULT_MUX_BASE_ADDRESS
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            wires: 1,
            buffer_size: DEFAULT_BUFFER_SIZE,
            mux_base_address: DEFAULT_MUX_BASE_ADDRESS,
        }
    }
}

impl BusConfig {
    /// Address of the multiplexer serving a module slot
    ///
    /// Wraps instead of overflowing for base addresses [`BusConfig`]
    /// validation would reject.
    pub fn mux_address(&self, module: u8) -> u8 {
        self.mux_base_address.wrapping_add(module)
    }

    fn validate(&self) -> Result<()> {
        if self.wires == 0 || self.wires > MAX_BUS + 1 {
            return Err(MuxnetError::InvalidConfig(format!(
                "bus.wires must be 1..={}, got {}",
                MAX_BUS + 1,
                self.wires
            )));
        }
        // A 16-bit register address plus at least one data byte
        if self.buffer_size < 3 {
            return Err(MuxnetError::InvalidConfig(format!(
                "bus.buffer_size must be at least 3, got {}",
                self.buffer_size
            )));
        }
        if self.mux_base_address as u16 + MAX_MODULE as u16 > MAX_ADDRESS as u16 {
            return Err(MuxnetError::InvalidConfig(format!(
                "bus.mux_base_address 0x{:02X} leaves no room for {} modules",
                self.mux_base_address,
                MAX_MODULE + 1
            )));
        }
        Ok(())
    }
}

/// Module configuration EEPROM settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EepromConfig {
    /// Identifier the EEPROM is registered under
    #[serde(default = "default_eeprom_identifier")]
    pub identifier: String,

    /// Sub-bus the EEPROM sits on
    #[serde(default)]
    pub subbus: u8,

    /// 7-bit EEPROM address
    #[serde(default = "default_eeprom_address")]
    pub address: u8,

    /// Capacity in bytes
    #[serde(default = "default_eeprom_capacity")]
    pub capacity: usize,

    /// Write page size in bytes
    #[serde(default = "default_eeprom_page_size")]
    pub page_size: usize,

    /// Upper bound on a single page write cycle
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write_timeout: Duration,
}

fn default_eeprom_identifier() -> String {
    DEFAULT_EEPROM_IDENTIFIER.to_string()
}

fn default_eeprom_address() -> u8 {
    DEFAULT_EEPROM_ADDRESS
}

fn default_eeprom_capacity() -> usize {
    DEFAULT_EEPROM_CAPACITY
}

fn default_eeprom_page_size() -> usize {
    DEFAULT_EEPROM_PAGE_SIZE
}

fn default_write_timeout() -> Duration {
    Duration::from_millis(10)
}

impl Default for EepromConfig {
    fn default() -> Self {
        Self {
            identifier: DEFAULT_EEPROM_IDENTIFIER.to_string(),
            subbus: DEFAULT_EEPROM_SUBBUS,
            address: DEFAULT_EEPROM_ADDRESS,
            capacity: DEFAULT_EEPROM_CAPACITY,
            page_size: DEFAULT_EEPROM_PAGE_SIZE,
            write_timeout: Duration::from_millis(10),
        }
    }
}

impl EepromConfig {
    fn validate(&self, bus: &BusConfig) -> Result<()> {
        if self.identifier.is_empty() {
            return Err(MuxnetError::InvalidConfig(
                "eeprom.identifier must not be empty".to_string(),
            ));
        }
        if self.subbus > MAX_SUBBUS || self.address > MAX_ADDRESS {
            return Err(MuxnetError::InvalidConfig(format!(
                "eeprom location {}:0x{:02X} is out of range",
                self.subbus, self.address
            )));
        }
        let mux_range = bus.mux_base_address..=bus.mux_address(MAX_MODULE);
        if mux_range.contains(&self.address) {
            return Err(MuxnetError::InvalidConfig(format!(
                "eeprom.address 0x{:02X} collides with the multiplexer range",
                self.address
            )));
        }
        if !(MIN_EEPROM_CAPACITY..=MAX_EEPROM_CAPACITY).contains(&self.capacity) {
            return Err(MuxnetError::InvalidConfig(format!(
                "eeprom.capacity must be {}..={}, got {}",
                MIN_EEPROM_CAPACITY, MAX_EEPROM_CAPACITY, self.capacity
            )));
        }
        if self.page_size == 0 || self.page_size > self.capacity {
            return Err(MuxnetError::InvalidConfig(format!(
                "eeprom.page_size must be 1..={}, got {}",
                self.capacity, self.page_size
            )));
        }
        Ok(())
    }
}

/// Probe timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Budget for a timed liveness probe
    #[serde(with = "humantime_serde", default = "default_ping_timeout")]
    pub ping_timeout: Duration,

    /// Interval between probe attempts
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_ping_timeout() -> Duration {
    Duration::from_millis(10)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(1)
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ping_timeout: Duration::from_millis(10),
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl TimingConfig {
    fn validate(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(MuxnetError::InvalidConfig(
                "timing.poll_interval must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for MuxnetConfig
#[derive(Debug, Default)]
pub struct MuxnetConfigBuilder {
    config: MuxnetConfig,
}

impl MuxnetConfigBuilder {
    /// Create a new builder with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of physical buses
    pub fn wires(mut self, wires: u8) -> Self {
        self.config.bus.wires = wires;
        self
    }

    /// Set the transport buffer size
    pub fn buffer_size(mut self, size: usize) -> Self {
        self.config.bus.buffer_size = size;
        self
    }

    /// Set the multiplexer base address
    pub fn mux_base_address(mut self, address: u8) -> Self {
        self.config.bus.mux_base_address = address;
        self
    }

    /// Set the EEPROM identifier
    pub fn eeprom_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.config.eeprom.identifier = identifier.into();
        self
    }

    /// Set the EEPROM location on its module
    pub fn eeprom_location(mut self, subbus: u8, address: u8) -> Self {
        self.config.eeprom.subbus = subbus;
        self.config.eeprom.address = address;
        self
    }

    /// Set the EEPROM geometry
    pub fn eeprom_geometry(mut self, capacity: usize, page_size: usize) -> Self {
        self.config.eeprom.capacity = capacity;
        self.config.eeprom.page_size = page_size;
        self
    }

    /// Set the EEPROM page write timeout
    pub fn eeprom_write_timeout(mut self, timeout: Duration) -> Self {
        self.config.eeprom.write_timeout = timeout;
        self
    }

    /// Set the timed-probe budget
    pub fn ping_timeout(mut self, timeout: Duration) -> Self {
        self.config.timing.ping_timeout = timeout;
        self
    }

    /// Set the interval between probe attempts
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.timing.poll_interval = interval;
        self
    }

    /// Build the configuration without validation
    pub fn build(self) -> MuxnetConfig {
        self.config
    }

    /// Build and validate the configuration
    pub fn try_build(self) -> Result<MuxnetConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// Custom serde module for Duration with humantime
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = MuxnetConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.bus.mux_address(3), 0x73);
        assert_eq!(config.eeprom.identifier, DEFAULT_EEPROM_IDENTIFIER);
    }

    #[test]
    fn test_mux_address_never_overflows() {
        let config = MuxnetConfigBuilder::new().mux_base_address(0xFE).build();
        assert_eq!(config.bus.mux_address(0), 0xFE);
        assert_eq!(config.bus.mux_address(7), 0x05);
        assert!(matches!(
            config.validate(),
            Err(MuxnetError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_builder() {
        let config = MuxnetConfigBuilder::new()
            .wires(2)
            .eeprom_identifier("id")
            .eeprom_geometry(256, 16)
            .ping_timeout(Duration::from_millis(20))
            .try_build()
            .unwrap();

        assert_eq!(config.bus.wires, 2);
        assert_eq!(config.eeprom.capacity, 256);
        assert_eq!(config.timing.ping_timeout, Duration::from_millis(20));
    }

    #[test]
    fn test_eeprom_fqa() {
        let config = MuxnetConfig::default();
        let fqa = config.eeprom_fqa(1, 2);
        assert_eq!(fqa, Fqa::encode(1, 2, 0, 0x50));
    }

    #[test]
    fn test_rejects_out_of_range() {
        assert!(MuxnetConfigBuilder::new().wires(9).try_build().is_err());
        assert!(MuxnetConfigBuilder::new().wires(0).try_build().is_err());
        assert!(MuxnetConfigBuilder::new()
            .eeprom_geometry(50, 8)
            .try_build()
            .is_err());
        assert!(MuxnetConfigBuilder::new()
            .eeprom_location(0, 0x71)
            .try_build()
            .is_err());
        assert!(MuxnetConfigBuilder::new()
            .mux_base_address(0x7A)
            .try_build()
            .is_err());
    }

    #[test]
    fn test_json_with_humantime() {
        let config = MuxnetConfig::from_json_str(
            r#"{"bus":{"wires":2},"timing":{"ping_timeout":"25ms","poll_interval":"2ms"}}"#,
        )
        .unwrap();
        assert_eq!(config.bus.wires, 2);
        assert_eq!(config.bus.buffer_size, DEFAULT_BUFFER_SIZE);
        assert_eq!(config.timing.ping_timeout, Duration::from_millis(25));

        let text = serde_json::to_string(&config).unwrap();
        assert!(text.contains("25ms"));
    }

    #[test]
    fn test_json_invalid() {
        let err = MuxnetConfig::from_json_str(r#"{"bus":{"wires":"two"}}"#).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }
}
