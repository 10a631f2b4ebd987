//! Error types for the device management kit

use nexum_device_transport::{DeviceId, TransportError, TransportIdentifier};
use thiserror::Error;

use crate::{refresher::RefresherError, session::DeviceSessionId};

/// Kit error type
#[derive(Debug, Error)]
pub enum KitError {
    /// No session with this id is registered
    #[error("Device session {0} not found")]
    SessionNotFound(DeviceSessionId),

    /// The session was closed
    #[error("Device session {0} is closed")]
    SessionClosed(DeviceSessionId),

    /// No transport is registered under this identifier
    #[error("Transport {0} not found")]
    TransportNotFound(TransportIdentifier),

    /// The device already has an open session
    #[error("Device {0} is already connected")]
    AlreadyConnected(DeviceId),

    /// The kit was closed
    #[error("Device management kit is closed")]
    Closed,

    /// Error from the transport layer
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Error from the refresher
    #[error(transparent)]
    Refresher(#[from] RefresherError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),
}

impl KitError {
    /// Whether the error means the device is gone
    pub const fn is_disconnected(&self) -> bool {
        match self {
            Self::Transport(err) => err.is_terminal(),
            Self::SessionClosed(_) | Self::SessionNotFound(_) => true,
            _ => false,
        }
    }
}
