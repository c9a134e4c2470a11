//! Driver error types.

use thiserror::Error;
use vmc_protocol::ProtocolError;

/// Errors returned to callers of the driver.
///
/// None of these are fatal to the process; a driver that failed to open its
/// transport stays inert and answers every call with
/// [`DriverError::TransportUnavailable`].
#[derive(Debug, Error)]
pub enum DriverError {
    /// The caller's wait expired before the transaction finished.
    #[error("timeout waiting for VMC response")]
    Timeout,

    /// The command was transmitted the maximum number of times without an ACK.
    #[error("command not acknowledged after {0} attempts")]
    MaxRetriesExceeded(u8),

    /// Menu sub-command name not present in the configured table.
    #[error("unknown menu sub-command: {0}")]
    UnknownSubCommand(String),

    /// Another transaction occupies the single pending slot.
    #[error("a command is already pending")]
    Busy,

    /// The transport could not be opened, or the protocol loop has stopped.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// I/O failure on the transport.
    #[error("transport I/O error: {0}")]
    Transport(#[from] std::io::Error),

    /// Frame could not be built or parsed.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DriverError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            DriverError::Timeout => "TIMEOUT",
            DriverError::MaxRetriesExceeded(_) => "MAX_RETRIES_REACHED",
            DriverError::UnknownSubCommand(_) => "UNKNOWN_SUB_COMMAND",
            DriverError::Busy => "BUSY",
            DriverError::TransportUnavailable(_) => "TRANSPORT_UNAVAILABLE",
            DriverError::Transport(_) => "TRANSPORT_ERROR",
            DriverError::Protocol(_) => "PROTOCOL_ERROR",
            DriverError::Config(_) => "CONFIG_ERROR",
        }
    }
}

/// Result type alias for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;
