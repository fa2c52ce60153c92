//! Muxnet Registry - Device model, discovery and routing
//!
//! This crate sits on top of the bus primitives and keeps track of *what*
//! is connected where.
//!
//! # Architecture
//!
//! 1. **Indices** - an address-ordered index and an identifier hash index
//! 2. **Devices** - peripherals with optional input/output capabilities
//! 3. **Groups** - bounded sets of same-identifier devices with a factory
//! 4. **Modules** - one multiplexer's devices plus the self-check and
//!    EEPROM discovery state machine
//! 5. **Routing** - a network-wide address ↔ identifier table built by
//!    scanning every module slot
//!
//! # Quick Start
//!
//! ```rust
//! use muxnet_bus::test_utils::TestFixture;
//! use muxnet_core::ErrorLevel;
//! use muxnet_registry::{Catalog, Module, ModuleState};
//!
//! let mut fixture = TestFixture::new();
//! fixture.add_module(0, Some(r#"[{"eeprom":[80]},{"sensor":[64]}]"#));
//!
//! let catalog = Catalog::new(&fixture.config);
//! let mut module = Module::new(0, 0, &fixture.config, catalog).unwrap();
//! assert_eq!(module.check(&mut fixture.fabric), ErrorLevel::None);
//! assert_eq!(module.state(), ModuleState::Ready);
//! assert_eq!(module.find_group("sensor").unwrap().len(), 1);
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod catalog;
pub mod device;
pub mod drivers;
pub mod group;
pub mod index;
pub mod module;
pub mod record;
pub mod routing;

// Re-exports for convenience
pub use catalog::Catalog;
pub use device::{Device, Endpoint, Input, Output};
pub use drivers::{
    bare_device, eeprom_device, register_device, EepromInput, EepromOutput, RegisterInput,
    RegisterOutput,
};
pub use group::{DeviceFactory, DeviceGroup, GROUP_CAPACITY};
pub use index::{HashIndex, OrderedIndex};
pub use module::{Module, ModuleState};
pub use record::{Record, RecordEntry};
pub use routing::{RoutingTable, ScanReport};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_group_capacity() {
        assert_eq!(GROUP_CAPACITY, 4);
    }
}
