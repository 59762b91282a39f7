//! Error handling for the station protocol core
//!
//! One error enum covers the whole crate. Transport-level failures carry the
//! refined network variants (`Timeout`, `ConnectionRefused`, ...) so callers
//! can log something better than a bare `IO error`; register-level failures
//! are flattened into [`StationError::Register`] because the controller treats
//! every register fault the same way (log, count, surface).
//!
//! Connection faults never cross the public async surface as panics: the
//! device layer resolves them into status transitions and events, and the
//! heartbeat loop treats them as a failed ping and keeps running.

use thiserror::Error;

/// Result type for station protocol operations
pub type Result<T> = std::result::Result<T, StationError>;

/// Errors that can occur in the device and protocol layers
#[derive(Error, Debug)]
pub enum StationError {
    /// I/O error (socket, shutdown, option tuning)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Register read/write failure, including modbus exceptions
    #[error("Register error: {0}")]
    Register(String),

    /// The transport reports itself disconnected
    #[error("No connection")]
    NotConnected,

    /// The peer closed the connection (readable with zero bytes available)
    #[error("Connection closed by peer")]
    ClosedByPeer,

    /// A network operation timed out
    #[error("Connection timeout: {0}")]
    Timeout(String),

    /// A connection attempt was actively refused by the remote peer
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// No route to the remote peer
    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An operation was cancelled by the caller
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// A positioning wait expired before the PLC raised the expected bit
    #[error("Positioning timeout: {0}")]
    PositioningTimeout(String),
}

impl StationError {
    /// Convert a generic I/O error into a more specific network error
    ///
    /// Examines the error kind and returns a refined variant when possible,
    /// so a connect failure logs as "Connection refused" instead of a generic
    /// I/O message.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use station_protocol::StationError;
    /// use std::io::{Error, ErrorKind};
    ///
    /// let io_error = Error::new(ErrorKind::TimedOut, "connect timed out");
    /// let error = StationError::from_io_error(io_error, "connecting to PLC");
    /// assert!(matches!(error, StationError::Timeout(_)));
    /// ```
    pub fn from_io_error(error: std::io::Error, context: &str) -> Self {
        use std::io::ErrorKind;

        match error.kind() {
            ErrorKind::TimedOut => StationError::Timeout(format!("{}: {}", context, error)),
            ErrorKind::ConnectionRefused => {
                StationError::ConnectionRefused(format!("{}: {}", context, error))
            }
            ErrorKind::NetworkUnreachable => {
                StationError::NetworkUnreachable(format!("{}: {}", context, error))
            }
            _ => StationError::Io(error),
        }
    }

    /// Whether this error is a positioning-wait cancellation
    ///
    /// Cancellation is not a fault: the sequence cleans up and reports it,
    /// but nothing is logged at error level and no retry is implied.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StationError::Cancelled(_))
    }
}
