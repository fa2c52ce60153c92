//! Bundled drivers
//!
//! - **EEPROM** - the module configuration EEPROM: a C-string record behind
//!   16-bit register addressing, written page by page
//! - **Register** - generic "N bytes at register R" input and output
//!
//! Each driver comes with a [`DeviceFactory`](crate::group::DeviceFactory)
//! so it can be installed in a [`Catalog`](crate::catalog::Catalog).

use serde_json::Value;
use std::any::Any;
use std::time::Duration;
use tracing::{debug, trace, warn};

use muxnet_bus::{mux, primitives, Fabric, RegisterAddress, Switch};
use muxnet_core::{ErrorLevel, Fqa, MuxnetConfig};

use crate::device::{Device, Endpoint, Input, Output};
use crate::record::Record;

// ============================================================================
// EEPROM
// ============================================================================

/// Reads the stored record as a string
#[derive(Debug, Clone)]
pub struct EepromInput {
    capacity: usize,
    value: Value,
}

impl EepromInput {
    /// Input bounded to `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            value: Value::Null,
        }
    }

    /// Record text from the last successful read
    pub fn text(&self) -> Option<&str> {
        self.value.as_str()
    }
}

impl Input for EepromInput {
    fn get(&mut self, fabric: &mut Fabric, endpoint: Endpoint, _args: &Value) -> ErrorLevel {
        let mut buf = vec![0u8; self.capacity];
        let len = match primitives::read_register(
            fabric,
            endpoint.fqa,
            RegisterAddress::U16(0),
            &mut buf,
            true,
            endpoint.switch,
        ) {
            Ok(len) => len,
            Err(level) => return level,
        };
        buf.truncate(len);

        match String::from_utf8(buf) {
            Ok(text) => {
                trace!(fqa = %endpoint.fqa, len, "Read EEPROM record");
                self.value = Value::String(text);
                ErrorLevel::None
            }
            Err(e) => {
                debug!(fqa = %endpoint.fqa, error = %e, "EEPROM record is not UTF-8");
                ErrorLevel::Soft
            }
        }
    }

    fn value(&self) -> &Value {
        &self.value
    }

    fn reset_cache(&mut self) {
        self.value = Value::Null;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Writes a record string, null-terminated, page by page
#[derive(Debug, Clone)]
pub struct EepromOutput {
    capacity: usize,
    page_size: usize,
    write_timeout: Duration,
    failsafe: String,
}

impl EepromOutput {
    /// Output with explicit geometry and failsafe record
    pub fn new(
        capacity: usize,
        page_size: usize,
        write_timeout: Duration,
        failsafe: impl Into<String>,
    ) -> Self {
        Self {
            capacity,
            page_size: page_size.max(1),
            write_timeout,
            failsafe: failsafe.into(),
        }
    }

    /// Output configured from the EEPROM section of a config
    pub fn from_config(config: &MuxnetConfig) -> Self {
        Self::new(
            config.eeprom.capacity,
            config.eeprom.page_size,
            config.eeprom.write_timeout,
            Record::failsafe(&config.eeprom).to_json(),
        )
    }

    fn write_pages(&self, fabric: &mut Fabric, fqa: Fqa, bytes: &[u8]) -> ErrorLevel {
        // Two bytes of every transfer go to the register address
        let room = fabric.buffer_size(fqa.bus()).saturating_sub(2).max(1);
        let mut offset = 0;
        while offset < bytes.len() {
            let page_left = self.page_size - offset % self.page_size;
            let len = page_left.min(room).min(bytes.len() - offset);
            let level = primitives::write_register(
                fabric,
                fqa,
                RegisterAddress::U16(offset as u16),
                &bytes[offset..offset + len],
                Switch::ROUTED,
            )
            .and_then(|| {
                primitives::ping_with_timeout(fabric, fqa, Switch::ROUTED, self.write_timeout)
            });
            if level.is_err() {
                debug!(fqa = %fqa, offset, level = %level, "EEPROM page write failed");
                return level;
            }
            offset += len;
        }
        ErrorLevel::None
    }
}

impl Output for EepromOutput {
    fn set(
        &mut self,
        fabric: &mut Fabric,
        endpoint: Endpoint,
        value: &Value,
        _args: &Value,
    ) -> ErrorLevel {
        let Some(text) = value.as_str() else {
            warn!(fqa = %endpoint.fqa, "EEPROM record must be a string");
            return ErrorLevel::Soft;
        };
        let mut bytes = Vec::with_capacity(text.len() + 1);
        bytes.extend_from_slice(text.as_bytes());
        bytes.push(0);
        if bytes.len() > self.capacity {
            warn!(
                fqa = %endpoint.fqa,
                size = bytes.len(),
                capacity = self.capacity,
                "EEPROM record too large"
            );
            return ErrorLevel::Soft;
        }

        if endpoint.switch.set_bus {
            let level = mux::set_bus(fabric, endpoint.fqa);
            if level.is_err() {
                return level;
            }
        }
        let level = self.write_pages(fabric, endpoint.fqa, &bytes);
        if endpoint.switch.reset_bus {
            let reset = mux::reset_bus(fabric, endpoint.fqa);
            if level.is_ok() {
                return reset;
            }
        }
        level
    }

    fn failsafe_value(&self) -> Value {
        Value::String(self.failsafe.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Register I/O
// ============================================================================

/// Reads `length` bytes starting at a register
///
/// The cached value is a number for one- and two-byte reads (big-endian)
/// and an array of bytes otherwise. `{"length": n}` overrides the length
/// for a single call.
#[derive(Debug, Clone)]
pub struct RegisterInput {
    register: RegisterAddress,
    length: usize,
    bytes: Vec<u8>,
    value: Value,
}

impl RegisterInput {
    /// Input reading `length` bytes at `register`
    pub fn new(register: RegisterAddress, length: usize) -> Self {
        Self {
            register,
            length,
            bytes: Vec::new(),
            value: Value::Null,
        }
    }

    /// Raw bytes from the last successful read
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl Input for RegisterInput {
    fn get(&mut self, fabric: &mut Fabric, endpoint: Endpoint, args: &Value) -> ErrorLevel {
        let length = args
            .get("length")
            .and_then(Value::as_u64)
            .map_or(self.length, |length| length as usize);
        let mut buf = vec![0u8; length];
        if let Err(level) = primitives::read_register(
            fabric,
            endpoint.fqa,
            self.register,
            &mut buf,
            false,
            endpoint.switch,
        ) {
            return level;
        }

        self.value = match buf.as_slice() {
            [byte] => Value::from(*byte),
            [high, low] => Value::from(u16::from_be_bytes([*high, *low])),
            bytes => Value::from(bytes.to_vec()),
        };
        self.bytes = buf;
        ErrorLevel::None
    }

    fn value(&self) -> &Value {
        &self.value
    }

    fn default_args(&self) -> Value {
        serde_json::json!({ "length": self.length })
    }

    fn reset_cache(&mut self) {
        self.bytes.clear();
        self.value = Value::Null;
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Writes a number or byte array starting at a register
///
/// Numbers up to `0xFF` are one byte, up to `0xFFFF` two big-endian
/// bytes; anything else that is not an array of bytes is Soft.
#[derive(Debug, Clone)]
pub struct RegisterOutput {
    register: RegisterAddress,
    failsafe: Value,
}

impl RegisterOutput {
    /// Output writing at `register`, resetting to `failsafe`
    pub fn new(register: RegisterAddress, failsafe: Value) -> Self {
        Self { register, failsafe }
    }

    fn encode(value: &Value) -> Option<Vec<u8>> {
        match value {
            Value::Number(number) => {
                let number = number.as_u64()?;
                if let Ok(byte) = u8::try_from(number) {
                    Some(vec![byte])
                } else {
                    u16::try_from(number).ok().map(|word| word.to_be_bytes().to_vec())
                }
            }
            Value::Array(items) => items
                .iter()
                .map(|item| item.as_u64().and_then(|n| u8::try_from(n).ok()))
                .collect(),
            _ => None,
        }
    }
}

impl Output for RegisterOutput {
    fn set(
        &mut self,
        fabric: &mut Fabric,
        endpoint: Endpoint,
        value: &Value,
        _args: &Value,
    ) -> ErrorLevel {
        match Self::encode(value) {
            Some(bytes) => primitives::write_register(
                fabric,
                endpoint.fqa,
                self.register,
                &bytes,
                endpoint.switch,
            ),
            None => {
                warn!(fqa = %endpoint.fqa, value = %value, "Unencodable register value");
                ErrorLevel::Soft
            }
        }
    }

    fn failsafe_value(&self) -> Value {
        self.failsafe.clone()
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

// ============================================================================
// Factories
// ============================================================================

/// Device with no capabilities
pub fn bare_device(identifier: &str, fqa: Fqa, _config: &MuxnetConfig) -> Device {
    Device::new(fqa, identifier)
}

/// Module configuration EEPROM
pub fn eeprom_device(identifier: &str, fqa: Fqa, config: &MuxnetConfig) -> Device {
    Device::new(fqa, identifier)
        .with_input(EepromInput::new(config.eeprom.capacity))
        .with_output(EepromOutput::from_config(config))
}

/// Single-byte register device at register 0
pub fn register_device(identifier: &str, fqa: Fqa, _config: &MuxnetConfig) -> Device {
    Device::new(fqa, identifier)
        .with_input(RegisterInput::new(RegisterAddress::U8(0), 1))
        .with_output(RegisterOutput::new(RegisterAddress::U8(0), Value::from(0u8)))
}
