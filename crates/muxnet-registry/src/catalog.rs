//! Identifier → driver factory catalog

use std::collections::HashMap;

use muxnet_core::{Fqa, MuxnetConfig};

use crate::device::Device;
use crate::drivers::{bare_device, eeprom_device};
use crate::group::DeviceFactory;

/// Which factory builds devices for each identifier
///
/// Unknown identifiers get [`bare_device`]. The configured EEPROM
/// identifier is always bound to [`eeprom_device`].
#[derive(Clone)]
pub struct Catalog {
    factories: HashMap<String, DeviceFactory>,
}

impl Catalog {
    /// Catalog with only the EEPROM driver installed
    pub fn new(config: &MuxnetConfig) -> Self {
        let mut factories: HashMap<String, DeviceFactory> = HashMap::new();
        factories.insert(config.eeprom.identifier.clone(), eeprom_device);
        Self { factories }
    }

    /// Bind an identifier to a factory, replacing any previous binding
    pub fn register(&mut self, identifier: impl Into<String>, factory: DeviceFactory) {
        self.factories.insert(identifier.into(), factory);
    }

    /// Builder-style [`Catalog::register`]
    pub fn with(mut self, identifier: impl Into<String>, factory: DeviceFactory) -> Self {
        self.register(identifier, factory);
        self
    }

    /// Factory for an identifier
    pub fn factory(&self, identifier: &str) -> DeviceFactory {
        self.factories
            .get(identifier)
            .copied()
            .unwrap_or(bare_device)
    }

    /// Whether an identifier has an explicit binding
    pub fn is_registered(&self, identifier: &str) -> bool {
        self.factories.contains_key(identifier)
    }

    /// Build a device for an identifier
    pub fn create(&self, identifier: &str, fqa: Fqa, config: &MuxnetConfig) -> Device {
        (self.factory(identifier))(identifier, fqa, config)
    }
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut identifiers: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        identifiers.sort_unstable();
        f.debug_struct("Catalog")
            .field("identifiers", &identifiers)
            .finish()
    }
}
