//! Muxnet Core - Addressing and contracts for multiplexed I²C networks
//!
//! A muxnet is a single physical I²C bus (or several) fanned out through
//! multiplexer chips ("modules"), each of which routes the bus to one of
//! eight sub-buses. This crate holds the pieces every other layer agrees on:
//!
//! - [`address`] - the 16-bit fully qualified address ([`Fqa`]) codec
//! - [`level`] - the ordered `None < Soft < Hard` outcome of bus operations
//! - [`error`] - the [`MuxnetError`] type for everything above the bus
//! - [`config`] - serde-loadable configuration with a builder
//! - [`transport`] - the [`Wire`] and [`Clock`] contracts the platform provides
//!
//! # Example
//!
//! ```rust
//! use muxnet_core::{encode, Field, Fqa};
//!
//! let fqa = encode(5, 3, 4, 65);
//! assert_eq!(fqa.field(Field::Subbus), 4);
//! assert_eq!(encode(8, 0, 0, 0), Fqa::INVALID);
//! ```

#![warn(missing_docs)]

pub mod address;
pub mod config;
pub mod error;
pub mod level;
pub mod transport;

// Re-exports for convenience
pub use address::{decode_field, encode, Field, Fqa};
pub use config::{BusConfig, EepromConfig, MuxnetConfig, MuxnetConfigBuilder, TimingConfig};
pub use error::{MuxnetError, Result};
pub use level::ErrorLevel;
pub use transport::{Clock, SystemClock, Wire};

// Protocol constants re-exports
pub use address::{MAX_ADDRESS, MAX_BUS, MAX_MODULE, MAX_SUBBUS, MODULE_SLOTS, SUBBUS_COUNT};
pub use config::{
    DEFAULT_BUFFER_SIZE, DEFAULT_EEPROM_ADDRESS, DEFAULT_EEPROM_IDENTIFIER,
    DEFAULT_MUX_BASE_ADDRESS,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
