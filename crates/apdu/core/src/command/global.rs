//! Status words every command may return

use thiserror::Error;

use crate::response::status::{StatusWord, common};

/// Errors shared by all commands, checked after the command-specific dictionary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum GlobalCommandError {
    /// The device is locked and needs the user's PIN (55 15)
    #[error("Device is locked")]
    DeviceLocked,

    /// The user refused the action on the device (55 01)
    #[error("Action refused on device")]
    ActionRefused,

    /// No PIN has been set up on the device (55 02)
    #[error("PIN not set")]
    PinNotSet,

    /// The device failed internally (52 23)
    #[error("Device internal error")]
    DeviceInternal,
}

impl GlobalCommandError {
    /// Look up a status word in the global dictionary
    pub const fn from_status(status: StatusWord) -> Option<Self> {
        match status.to_u16() {
            0x5515 => Some(Self::DeviceLocked),
            0x5501 => Some(Self::ActionRefused),
            0x5502 => Some(Self::PinNotSet),
            0x5223 => Some(Self::DeviceInternal),
            _ => None,
        }
    }

    /// The status word this error corresponds to
    pub const fn status(&self) -> StatusWord {
        match self {
            Self::DeviceLocked => common::DEVICE_LOCKED,
            Self::ActionRefused => common::ACTION_REFUSED,
            Self::PinNotSet => common::PIN_NOT_SET,
            Self::DeviceInternal => common::DEVICE_INTERNAL_ERROR,
        }
    }
}
