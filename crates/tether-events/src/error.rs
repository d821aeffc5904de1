//! Event bus error types.

use thiserror::Error;

use crate::capture::ViolationKind;
use crate::host::HostId;

/// Errors that can occur when registering listeners or configuring a bus.
#[derive(Debug, Error)]
pub enum BusError {
    /// A host-bound handler captured state the bus cannot safely retain.
    #[error("capture violation: {type_name} ({kind})")]
    CaptureViolation {
        /// Declared type of the offending captured value.
        type_name: &'static str,
        /// Why the capture was rejected.
        kind: ViolationKind,
    },

    /// The declared host is already gone or reports itself as not alive.
    #[error("invalid host: {host} is not alive")]
    InvalidHost {
        /// Identity of the rejected host.
        host: HostId,
    },

    /// Configuration validation failed.
    #[error("Configuration error: {message}")]
    Config {
        /// Validation failure description.
        message: String,
    },

    /// Failed to parse TOML configuration.
    #[error("Failed to parse bus config: {source}")]
    ConfigParse {
        /// Underlying TOML parse error.
        #[from]
        source: toml::de::Error,
    },
}

impl BusError {
    /// Returns `true` if this is a registration-time capture violation.
    #[must_use]
    pub fn is_capture_violation(&self) -> bool {
        matches!(self, Self::CaptureViolation { .. })
    }
}

/// Result type for event bus operations.
pub type BusResult<T> = Result<T, BusError>;
