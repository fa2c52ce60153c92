//! Muxnet Bus - Multiplexer driver and device primitives
//!
//! This crate turns the raw [`Wire`](muxnet_core::Wire) transport into
//! addressed, multiplexer-aware operations on a single device.
//!
//! # Architecture
//!
//! 1. **Fabric** - owns one wire per bus plus the polling clock
//! 2. **Multiplexer** - routes a bus to one sub-bus of a module ([`mux`])
//! 3. **Primitives** - ping, timed ping, chunked register reads and writes
//!
//! Every primitive brackets its transactions with a sub-bus switch and a
//! reset unless told otherwise through [`Switch`].
//!
//! # Quick Start
//!
//! ```rust
//! use muxnet_bus::test_utils::{SimDevice, TestFixture};
//! use muxnet_bus::{read_register_u16, write_register_u16, RegisterAddress, Switch};
//! use muxnet_core::Fqa;
//!
//! let mut fixture = TestFixture::new();
//! let sensor = Fqa::encode(0, 0, 1, 0x48);
//! fixture.sim.add_mux(0);
//! fixture.sim.add_device(sensor, SimDevice::with_memory(8));
//!
//! let level = write_register_u16(
//!     &mut fixture.fabric,
//!     sensor,
//!     RegisterAddress::U8(2),
//!     0x1234,
//!     Switch::BRACKETED,
//! );
//! assert!(level.is_ok());
//!
//! let value = read_register_u16(&mut fixture.fabric, sensor, RegisterAddress::U8(2), Switch::BRACKETED);
//! assert_eq!(value, Ok(0x1234));
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod fabric;
pub mod mux;
pub mod primitives;

// Simulated hardware
pub mod test_utils;

// Re-exports for convenience
pub use fabric::Fabric;
pub use primitives::{
    ping, ping_with_timeout, read, read_byte, read_register, read_register_u16, read_register_u8,
    write, write_byte, write_register, write_register_u16, write_register_u8, RegisterAddress,
    Switch,
};

pub use muxnet_core::{ErrorLevel, Fqa};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
