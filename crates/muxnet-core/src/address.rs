//! Fully qualified addresses
//!
//! Every peripheral in a muxnet is reached through a physical bus, a
//! multiplexer ("module") hanging off that bus, one of the multiplexer's
//! sub-buses, and finally the peripheral's own 7-bit address. The
//! [`Fqa`] packs those four coordinates into a single `u16`:
//!
//! ```text
//!  15    13 12    10 9      7 6                0
//! +--------+--------+--------+------------------+
//! |  bus   | module | subbus |  device address  |
//! +--------+--------+--------+------------------+
//!   3 bits   3 bits   3 bits       7 bits
//! ```
//!
//! The all-zero value is reserved as [`Fqa::INVALID`]; [`encode`] returns it
//! whenever a field is out of range.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{MuxnetError, Result};

/// Largest bus index
pub const MAX_BUS: u8 = 7;

/// Largest module (multiplexer) index on a bus
pub const MAX_MODULE: u8 = 7;

/// Largest sub-bus index on a multiplexer
pub const MAX_SUBBUS: u8 = 7;

/// Largest 7-bit device address
pub const MAX_ADDRESS: u8 = 127;

/// Number of sub-buses behind a single multiplexer
pub const SUBBUS_COUNT: usize = MAX_SUBBUS as usize + 1;

/// Number of module slots on a single bus
pub const MODULE_SLOTS: usize = MAX_MODULE as usize + 1;

/// One of the four packed fields of an [`Fqa`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    /// Physical bus index (3 bits)
    Bus,
    /// Multiplexer index on the bus (3 bits)
    Module,
    /// Sub-bus index on the multiplexer (3 bits)
    Subbus,
    /// 7-bit device address
    Address,
}

impl Field {
    const fn shift(self) -> u16 {
        match self {
            Field::Bus => 13,
            Field::Module => 10,
            Field::Subbus => 7,
            Field::Address => 0,
        }
    }

    const fn mask(self) -> u16 {
        match self {
            Field::Bus | Field::Module | Field::Subbus => 0b111,
            Field::Address => 0x7F,
        }
    }

    /// Largest value the field can hold
    pub const fn max(self) -> u8 {
        self.mask() as u8
    }
}

/// A fully qualified address
///
/// Immutable value type; copy it freely. Ordering follows the packed
/// integer, so all devices of one module sort next to each other.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Fqa(u16);

impl Fqa {
    /// The reserved "invalid" address
    pub const INVALID: Fqa = Fqa(0);

    /// Pack four fields, yielding [`Fqa::INVALID`] if any is out of range
    pub const fn encode(bus: u8, module: u8, subbus: u8, address: u8) -> Fqa {
        if bus > MAX_BUS || module > MAX_MODULE || subbus > MAX_SUBBUS || address > MAX_ADDRESS {
            return Fqa::INVALID;
        }
        Fqa(((bus as u16) << Field::Bus.shift())
            | ((module as u16) << Field::Module.shift())
            | ((subbus as u16) << Field::Subbus.shift())
            | (address as u16))
    }

    /// Pack four fields, reporting out-of-range input as an error
    pub fn try_new(bus: u8, module: u8, subbus: u8, address: u8) -> Result<Fqa> {
        let fqa = Fqa::encode(bus, module, subbus, address);
        if fqa.is_valid() {
            Ok(fqa)
        } else {
            Err(MuxnetError::InvalidAddress {
                bus,
                module,
                subbus,
                address,
            })
        }
    }

    /// Wrap a raw packed value
    pub const fn from_raw(raw: u16) -> Fqa {
        Fqa(raw)
    }

    /// The raw packed value
    pub const fn raw(self) -> u16 {
        self.0
    }

    /// Extract a single field
    pub const fn field(self, field: Field) -> u8 {
        ((self.0 >> field.shift()) & field.mask()) as u8
    }

    /// Physical bus index
    pub const fn bus(self) -> u8 {
        self.field(Field::Bus)
    }

    /// Multiplexer index on the bus
    pub const fn module(self) -> u8 {
        self.field(Field::Module)
    }

    /// Sub-bus index on the multiplexer
    pub const fn subbus(self) -> u8 {
        self.field(Field::Subbus)
    }

    /// 7-bit device address
    pub const fn address(self) -> u8 {
        self.field(Field::Address)
    }

    /// Whether this is anything but the reserved invalid value
    pub const fn is_valid(self) -> bool {
        self.0 != Fqa::INVALID.0
    }

    /// Another device behind the same multiplexer
    pub const fn sibling(self, subbus: u8, address: u8) -> Fqa {
        Fqa::encode(self.bus(), self.module(), subbus, address)
    }

    /// Whether both addresses route through the same bus and multiplexer
    pub const fn same_module(self, other: Fqa) -> bool {
        self.bus() == other.bus() && self.module() == other.module()
    }
}

impl fmt::Display for Fqa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}:0x{:02X}",
            self.bus(),
            self.module(),
            self.subbus(),
            self.address()
        )
    }
}

impl From<Fqa> for u16 {
    fn from(fqa: Fqa) -> Self {
        fqa.raw()
    }
}

/// Pack four fields into an [`Fqa`] (see [`Fqa::encode`])
pub const fn encode(bus: u8, module: u8, subbus: u8, address: u8) -> Fqa {
    Fqa::encode(bus, module, subbus, address)
}

/// Extract a single field from an [`Fqa`]
pub const fn decode_field(fqa: Fqa, field: Field) -> u8 {
    fqa.field(field)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_value() {
        let fqa = encode(5, 3, 4, 65);
        assert_eq!(fqa.raw(), 0b1010_1110_0100_0001);
        assert_eq!(decode_field(fqa, Field::Bus), 5);
        assert_eq!(decode_field(fqa, Field::Module), 3);
        assert_eq!(decode_field(fqa, Field::Subbus), 4);
        assert_eq!(decode_field(fqa, Field::Address), 65);
    }

    #[test]
    fn test_roundtrip_all_valid_fields() {
        for bus in 0..=MAX_BUS {
            for module in 0..=MAX_MODULE {
                for subbus in 0..=MAX_SUBBUS {
                    for address in 0..=MAX_ADDRESS {
                        let fqa = encode(bus, module, subbus, address);
                        assert_eq!(fqa.bus(), bus);
                        assert_eq!(fqa.module(), module);
                        assert_eq!(fqa.subbus(), subbus);
                        assert_eq!(fqa.address(), address);
                    }
                }
            }
        }
    }

    #[test]
    fn test_out_of_range_is_invalid() {
        assert_eq!(encode(8, 0, 0, 1), Fqa::INVALID);
        assert_eq!(encode(0, 8, 0, 1), Fqa::INVALID);
        assert_eq!(encode(0, 0, 8, 1), Fqa::INVALID);
        assert_eq!(encode(0, 0, 0, 128), Fqa::INVALID);
        assert_eq!(encode(255, 255, 255, 255), Fqa::INVALID);
        assert!(Fqa::try_new(1, 2, 3, 200).is_err());
    }

    #[test]
    fn test_field_max() {
        assert_eq!(Field::Bus.max(), MAX_BUS);
        assert_eq!(Field::Address.max(), MAX_ADDRESS);
    }

    #[test]
    fn test_ordering_groups_modules() {
        let a = encode(0, 1, 7, 127);
        let b = encode(0, 2, 0, 1);
        assert!(a < b);
        assert!(a.same_module(a.sibling(0, 0x50)));
        assert!(!a.same_module(b));
    }

    #[test]
    fn test_display() {
        assert_eq!(encode(1, 2, 3, 0x50).to_string(), "1.2.3:0x50");
    }

    #[test]
    fn test_serde_transparent() {
        let fqa = encode(0, 0, 0, 80);
        let json = serde_json::to_string(&fqa).unwrap();
        assert_eq!(json, "80");
        let back: Fqa = serde_json::from_str(&json).unwrap();
        assert_eq!(back, fqa);
    }
}
