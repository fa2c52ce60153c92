//! The device-list record stored in a module EEPROM
//!
//! The record is JSON text, stored as a C string: an array with one object
//! per sub-bus, mapping device identifiers to the addresses present on that
//! sub-bus.
//!
//! ```json
//! [{"eeprom": [80]}, {"sensor": [64, 65]}]
//! ```
//!
//! Sub-bus 0 holds the EEPROM itself and sub-bus 1 two sensors.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use muxnet_core::{EepromConfig, Fqa, MuxnetError, Result, MAX_ADDRESS, SUBBUS_COUNT};

/// One record entry: a device identifier at a sub-bus address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordEntry {
    /// Sub-bus index
    pub subbus: u8,
    /// Device identifier
    pub identifier: String,
    /// 7-bit device address
    pub address: u8,
}

impl RecordEntry {
    /// Full address of this entry on a given module
    pub fn fqa(&self, bus: u8, module: u8) -> Fqa {
        Fqa::encode(bus, module, self.subbus, self.address)
    }
}

/// Parsed device-list record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record {
    subbuses: Vec<BTreeMap<String, Vec<u8>>>,
}

impl Record {
    /// Parse and validate record text
    ///
    /// Blank text and records naming no devices are [`MuxnetError::RecordEmpty`];
    /// malformed JSON is [`MuxnetError::RecordParse`]; more than eight
    /// sub-buses or a non-7-bit address is [`MuxnetError::InvalidRecord`].
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Err(MuxnetError::RecordEmpty);
        }
        let record: Record = serde_json::from_str(text)?;
        record.validate()?;
        if record.is_empty() {
            return Err(MuxnetError::RecordEmpty);
        }
        Ok(record)
    }

    /// The minimal record naming only the EEPROM itself
    pub fn failsafe(eeprom: &EepromConfig) -> Self {
        let mut record = Record::default();
        record.insert(eeprom.subbus, &eeprom.identifier, eeprom.address);
        record
    }

    /// Add an entry, growing the sub-bus list as needed
    pub fn insert(&mut self, subbus: u8, identifier: &str, address: u8) {
        let index = subbus as usize;
        if self.subbuses.len() <= index {
            self.subbuses.resize_with(index + 1, BTreeMap::new);
        }
        let addresses = self.subbuses[index]
            .entry(identifier.to_string())
            .or_default();
        if !addresses.contains(&address) {
            addresses.push(address);
        }
    }

    /// Number of sub-bus slots described
    pub fn subbus_count(&self) -> usize {
        self.subbuses.len()
    }

    /// Whether no device is named at all
    pub fn is_empty(&self) -> bool {
        self.subbuses
            .iter()
            .all(|devices| devices.values().all(Vec::is_empty))
    }

    /// Every entry, by sub-bus then identifier
    pub fn entries(&self) -> impl Iterator<Item = RecordEntry> + '_ {
        self.subbuses
            .iter()
            .enumerate()
            .flat_map(|(subbus, devices)| {
                devices.iter().flat_map(move |(identifier, addresses)| {
                    addresses.iter().map(move |address| RecordEntry {
                        subbus: subbus as u8,
                        identifier: identifier.clone(),
                        address: *address,
                    })
                })
            })
    }

    /// Serialized length including the C-string terminator
    pub fn stored_len(&self) -> usize {
        self.to_json().len() + 1
    }

    /// Compact JSON text
    pub fn to_json(&self) -> String {
        // String keys over byte arrays cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    fn validate(&self) -> Result<()> {
        if self.subbuses.len() > SUBBUS_COUNT {
            return Err(MuxnetError::InvalidRecord(format!(
                "{} sub-bus entries, at most {} allowed",
                self.subbuses.len(),
                SUBBUS_COUNT
            )));
        }
        if let Some(entry) = self.entries().find(|entry| entry.address > MAX_ADDRESS) {
            return Err(MuxnetError::InvalidRecord(format!(
                "address {} for {} on sub-bus {} is not a 7-bit address",
                entry.address, entry.identifier, entry.subbus
            )));
        }
        Ok(())
    }
}

impl FromStr for Record {
    type Err = MuxnetError;

    fn from_str(text: &str) -> Result<Self> {
        Record::parse(text)
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json())
    }
}
