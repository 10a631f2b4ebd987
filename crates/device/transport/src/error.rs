//! Error types for device transports and connections

use nexum_apdu_framing::FramingError;
use thiserror::Error;

/// Transport error type
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// No device matching the request could be reached
    #[error("No accessible device")]
    NoAccessibleDevice,

    /// The device was found but the link could not be opened
    #[error("Failed to open connection: {0}")]
    OpeningConnection(String),

    /// Writing a frame to the link failed
    #[error("Failed to write frame: {0}")]
    WriteFailed(String),

    /// An inbound frame was malformed
    #[error(transparent)]
    Framing(#[from] FramingError),

    /// The device did not come back after a disconnection-triggering command
    #[error("Device did not reconnect in time")]
    ReconnectionFailed,

    /// The link has not completed its setup exchange
    #[error("Device not initialized: {0}")]
    DeviceNotInitialized(String),

    /// The connection was terminated
    #[error("Device disconnected")]
    Disconnected,

    /// The exchange did not complete within the caller's timeout
    #[error("Operation timed out")]
    Timeout,

    /// The device id is not known to the transport
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// Another exchange is already in flight on this connection
    #[error("An APDU exchange is already in progress")]
    AlreadySending,

    /// Other error with message
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Create a write failure
    pub fn write_failed<S: Into<String>>(message: S) -> Self {
        Self::WriteFailed(message.into())
    }

    /// Create a general other error
    pub fn other<S: Into<String>>(message: S) -> Self {
        Self::Other(message.into())
    }

    /// Whether the connection can no longer be used
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::ReconnectionFailed)
    }
}
