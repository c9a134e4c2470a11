//! Protocol error types.

use thiserror::Error;

/// Errors that can occur when encoding or decoding VMC frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Frame is too short to be valid.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum length.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// Frame does not begin with the `FA FB` start marker.
    #[error("frame does not start with FA FB")]
    MissingMarker,

    /// Buffer length disagrees with the frame's length byte.
    #[error("length mismatch: length byte declares {declared} bytes, buffer holds {actual}")]
    LengthMismatch {
        /// Total frame size implied by the length byte.
        declared: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// Payload does not fit in the one-byte length field.
    #[error("payload too long: maximum {max} bytes, got {actual}")]
    PayloadTooLong {
        /// Maximum allowed payload length.
        max: usize,
        /// Actual payload length.
        actual: usize,
    },

    /// Trailing XOR byte does not match the frame contents.
    #[error("checksum mismatch: expected 0x{expected:02X}, got 0x{actual:02X}")]
    ChecksumMismatch {
        /// Checksum computed over the frame.
        expected: u8,
        /// Checksum carried by the frame.
        actual: u8,
    },

    /// Symbolic command name not present in the command table.
    #[error("unknown command name: {0}")]
    UnknownCommandName(String),
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;
