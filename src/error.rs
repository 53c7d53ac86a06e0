//! Error categories shared by every layer.
//!
//! Each module defines its own error enum; `category()` on each of them maps
//! into [`ErrorCategory`] so callers can decide on recovery without matching
//! every variant.

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Module, service, fixture or routine unresolved. Recoverable by
    /// re-discovering.
    NotFound,
    /// Response smaller than declared or malformed offsets.
    ProtocolViolation,
    /// Buffer too small; the error carries the exact size required.
    Capacity,
    /// Descriptor rejected by a construction rule.
    Policy,
    /// Service start or device access denied.
    Permission,
    /// The executor asked for the run to stop.
    Abort,
    Other,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::ProtocolViolation => "protocol_violation",
            Self::Capacity => "capacity",
            Self::Policy => "policy",
            Self::Permission => "permission",
            Self::Abort => "abort",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
