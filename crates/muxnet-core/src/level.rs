//! Outcome severity for bus operations
//!
//! Bus primitives never panic and never return a rich error: they report
//! one of three ordered levels. Callers test `level > ErrorLevel::None` (or
//! [`ErrorLevel::is_err`]) to mean "any failure".

use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered outcome of a bus operation: `None < Soft < Hard`
#[must_use]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum ErrorLevel {
    /// Success
    #[default]
    None,
    /// Device reachable, but the operation partially failed
    /// (short transfer, malformed data)
    Soft,
    /// Device or module electrically unreachable
    Hard,
}

impl ErrorLevel {
    /// `true` for [`ErrorLevel::None`]
    pub fn is_ok(self) -> bool {
        self == ErrorLevel::None
    }

    /// `true` for anything worse than [`ErrorLevel::None`]
    pub fn is_err(self) -> bool {
        self > ErrorLevel::None
    }

    /// The more severe of two levels
    pub fn worst(self, other: ErrorLevel) -> ErrorLevel {
        self.max(other)
    }

    /// Run `next` only if `self` is a success, short-circuiting otherwise
    pub fn and_then(self, next: impl FnOnce() -> ErrorLevel) -> ErrorLevel {
        if self.is_err() {
            self
        } else {
            next()
        }
    }

    /// Convert into a `Result`, keeping the failing level on the `Err` side
    pub fn into_result(self) -> Result<(), ErrorLevel> {
        if self.is_ok() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl From<Result<(), ErrorLevel>> for ErrorLevel {
    fn from(result: Result<(), ErrorLevel>) -> Self {
        match result {
            Ok(()) => ErrorLevel::None,
            Err(level) => level,
        }
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorLevel::None => write!(f, "none"),
            ErrorLevel::Soft => write!(f, "soft"),
            ErrorLevel::Hard => write!(f, "hard"),
        }
    }
}
