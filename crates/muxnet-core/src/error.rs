//! Error types for muxnet operations
//!
//! Bus primitives report an [`ErrorLevel`]. Everything above the bus
//! (indexing, record parsing, configuration) reports a [`MuxnetError`],
//! which can always be collapsed back into a level with
//! [`MuxnetError::level`].

use thiserror::Error;

use crate::address::Fqa;
use crate::level::ErrorLevel;

/// Main error type for muxnet operations
#[derive(Error, Debug)]
pub enum MuxnetError {
    // ===== Addressing Errors =====
    /// One of the address fields is out of range
    #[error("Invalid address: bus={bus} module={module} subbus={subbus} address={address}")]
    InvalidAddress {
        /// Bus index
        bus: u8,
        /// Module index
        module: u8,
        /// Sub-bus index
        subbus: u8,
        /// Device address
        address: u8,
    },

    /// No wire is registered for this bus index
    #[error("Unknown bus index: {0}")]
    UnknownBus(u8),

    /// Address does not belong to the module and is not an allowed foreign device
    #[error("Address {fqa} is outside module {bus}.{module}")]
    ForeignAddress {
        /// The rejected address
        fqa: Fqa,
        /// Module bus index
        bus: u8,
        /// Module index
        module: u8,
    },

    /// A bus transfer failed
    #[error("Bus transfer to {fqa} failed ({level})")]
    Transfer {
        /// Target address
        fqa: Fqa,
        /// Reported level
        level: ErrorLevel,
    },

    // ===== Index Errors =====
    /// Address is already present in an index
    #[error("Address already indexed: {0}")]
    DuplicateAddress(Fqa),

    /// Address is not present in an index
    #[error("Address not indexed: {0}")]
    NotFound(Fqa),

    /// A device identifier does not match the group it is added to
    #[error("Identifier mismatch for {fqa}: expected {expected}, found {found}")]
    IdentifierMismatch {
        /// Device address
        fqa: Fqa,
        /// Identifier of the group
        expected: String,
        /// Identifier of the device
        found: String,
    },

    /// A device group has no room left
    #[error("Device group {identifier} is full (capacity {capacity})")]
    GroupFull {
        /// Group identifier
        identifier: String,
        /// Fixed group capacity
        capacity: usize,
    },

    // ===== Record Errors =====
    /// Device-list record could not be parsed
    #[error("Record parse error: {0}")]
    RecordParse(String),

    /// Device-list record is empty
    #[error("Record is empty")]
    RecordEmpty,

    /// Device-list record parsed but has invalid content
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Device-list record does not fit the EEPROM
    #[error("Record too large: {size} bytes exceeds capacity of {capacity} bytes")]
    RecordTooLarge {
        /// Encoded record size including terminator
        size: usize,
        /// EEPROM capacity
        capacity: usize,
    },

    // ===== Configuration Errors =====
    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== General Errors =====
    /// IO error wrapper
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MuxnetError {
    /// Collapse this error into an [`ErrorLevel`]
    ///
    /// Only electrical unreachability is Hard; data, index and
    /// configuration problems are Soft.
    pub fn level(&self) -> ErrorLevel {
        match self {
            MuxnetError::Transfer { level, .. } => *level,
            MuxnetError::UnknownBus(_) => ErrorLevel::Hard,
            _ => ErrorLevel::Soft,
        }
    }

    /// Check if this is a record (data-layer) error
    pub fn is_record_error(&self) -> bool {
        matches!(
            self,
            MuxnetError::RecordParse(_)
                | MuxnetError::RecordEmpty
                | MuxnetError::InvalidRecord(_)
                | MuxnetError::RecordTooLarge { .. }
        )
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            MuxnetError::InvalidAddress { .. } => "INVALID_ADDRESS",
            MuxnetError::UnknownBus(_) => "UNKNOWN_BUS",
            MuxnetError::ForeignAddress { .. } => "FOREIGN_ADDRESS",
            MuxnetError::Transfer { .. } => "TRANSFER",
            MuxnetError::DuplicateAddress(_) => "DUPLICATE_ADDRESS",
            MuxnetError::NotFound(_) => "NOT_FOUND",
            MuxnetError::IdentifierMismatch { .. } => "IDENTIFIER_MISMATCH",
            MuxnetError::GroupFull { .. } => "GROUP_FULL",
            MuxnetError::RecordParse(_) => "RECORD_PARSE",
            MuxnetError::RecordEmpty => "RECORD_EMPTY",
            MuxnetError::InvalidRecord(_) => "INVALID_RECORD",
            MuxnetError::RecordTooLarge { .. } => "RECORD_TOO_LARGE",
            MuxnetError::InvalidConfig(_) => "INVALID_CONFIG",
            MuxnetError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias for muxnet operations
pub type Result<T> = std::result::Result<T, MuxnetError>;

// Conversion from serde_json errors (record and config parsing)
impl From<serde_json::Error> for MuxnetError {
    fn from(err: serde_json::Error) -> Self {
        MuxnetError::RecordParse(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = MuxnetError::GroupFull {
            identifier: "lux".to_string(),
            capacity: 4,
        };
        assert_eq!(err.error_code(), "GROUP_FULL");
        assert!(err.to_string().contains("lux"));
    }

    #[test]
    fn test_levels() {
        assert_eq!(MuxnetError::RecordEmpty.level(), ErrorLevel::Soft);
        assert_eq!(MuxnetError::UnknownBus(3).level(), ErrorLevel::Hard);
        let err = MuxnetError::Transfer {
            fqa: Fqa::encode(0, 0, 0, 0x50),
            level: ErrorLevel::Hard,
        };
        assert_eq!(err.level(), ErrorLevel::Hard);
    }

    #[test]
    fn test_is_record_error() {
        assert!(MuxnetError::RecordParse("eof".to_string()).is_record_error());
        assert!(!MuxnetError::NotFound(Fqa::INVALID).is_record_error());
    }

    #[test]
    fn test_from_serde_json() {
        let err: MuxnetError = serde_json::from_str::<Vec<u8>>("[1,").unwrap_err().into();
        assert_eq!(err.error_code(), "RECORD_PARSE");
    }
}
