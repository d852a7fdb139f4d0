//! Error types for insflash.

use std::io;
use thiserror::Error;

use crate::protocol::PacketType;

/// Result type for insflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for insflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, raw socket, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// A complete frame arrived but its CRC did not match.
    #[error("CRC failure on {packet_type} frame")]
    CrcFailure {
        /// Type tag of the dropped frame.
        packet_type: PacketType,
    },

    /// No matching reply within the retry budget.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The peer did not answer a probe sent in this dialect.
    #[error("No reply to probe (length as protocol: {use_length_as_protocol})")]
    DialectMismatch {
        /// Dialect used by the unanswered probe.
        use_length_as_protocol: bool,
    },

    /// No device answered the discovery cycle.
    #[error("Device not found")]
    DeviceNotFound,

    /// The upgrade session failed and must be restarted from scratch.
    #[error("Upgrade aborted in {key}: {reason}")]
    UpgradeAborted {
        /// Key of the worker that failed.
        key: String,
        /// Failure description.
        reason: String,
    },

    /// Stop was requested while an operation was in progress.
    #[error("Operation stopped")]
    Stopped,

    /// Malformed combined firmware image.
    #[error("Invalid firmware image: {0}")]
    InvalidImage(String),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Unsupported device or operation.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller may retry the operation that produced this error.
    ///
    /// Session-level failures and explicit stops are terminal.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CrcFailure { .. }
                | Self::Timeout(_)
                | Self::DialectMismatch { .. }
                | Self::DeviceNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(Error::Timeout("x".into()).is_recoverable());
        assert!(Error::DeviceNotFound.is_recoverable());
        assert!(
            Error::DialectMismatch {
                use_length_as_protocol: true
            }
            .is_recoverable()
        );
        assert!(!Error::Stopped.is_recoverable());
        assert!(
            !Error::UpgradeAborted {
                key: "ins".into(),
                reason: "no ack".into()
            }
            .is_recoverable()
        );
    }

    #[test]
    fn test_display_includes_context() {
        let err = Error::UpgradeAborted {
            key: "rtk".into(),
            reason: "block 3 not acknowledged".into(),
        };
        assert_eq!(
            err.to_string(),
            "Upgrade aborted in rtk: block 3 not acknowledged"
        );
        let crc = Error::CrcFailure {
            packet_type: PacketType::new(0x01, 0xCC),
        };
        assert!(crc.to_string().contains("01cc"));
    }
}
