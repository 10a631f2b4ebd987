use nexum_apdu_core::{CommandError, CommandErrorCodes, GlobalCommandError};
use nexum_device_transport::TransportError;
use thiserror::Error;

use crate::{error::KitError, refresher::RefresherError};

/// Terminal failure of a device action
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceActionError {
    /// The device stayed locked
    #[error("Device is locked")]
    DeviceLocked,

    /// The device has not been set up
    #[error("Device is not onboarded")]
    DeviceNotOnboarded,

    /// The user rejected the action on the device
    #[error("Action refused by user")]
    RefusedByUser,

    /// The requested app is not installed
    #[error("Application {0} is not installed")]
    UnknownApp(String),

    /// The device is running another app than expected
    #[error("Expected {expected} to be running, found {actual}")]
    WrongApp {
        /// App the action needed
        expected: String,
        /// App the device reported
        actual: String,
    },

    /// A command failed on the device
    #[error("{command} failed: {message}")]
    Command {
        /// Name of the failing command
        command: &'static str,
        /// Raw status word, when the device answered
        error_code: Option<String>,
        /// Description of the failure
        message: String,
    },

    /// The exchange failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The refresher could not be paused or resumed
    #[error(transparent)]
    Refresher(#[from] RefresherError),

    /// The session was closed under the action
    #[error("Device session closed")]
    SessionClosed,

    /// The action was cancelled by the caller
    #[error("Action cancelled by user")]
    UserCancelled,
}

impl DeviceActionError {
    /// Map a command failure, lifting the global errors actions care about
    pub fn from_command<E: CommandErrorCodes>(command: &'static str, err: CommandError<E>) -> Self {
        match err {
            CommandError::Global(GlobalCommandError::DeviceLocked) => Self::DeviceLocked,
            CommandError::Global(GlobalCommandError::ActionRefused) => Self::RefusedByUser,
            CommandError::Global(GlobalCommandError::PinNotSet) => Self::DeviceNotOnboarded,
            err => Self::Command {
                command,
                error_code: err.error_code(),
                message: err.to_string(),
            },
        }
    }
}

impl From<KitError> for DeviceActionError {
    fn from(err: KitError) -> Self {
        match err {
            KitError::Transport(e) => Self::Transport(e),
            KitError::Refresher(e) => Self::Refresher(e),
            _ => Self::SessionClosed,
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use nexum_apdu_core::{ApduResponse, NoCommandErrors};

    use super::*;

    fn from_sw(sw: u16) -> DeviceActionError {
        let err = CommandError::<NoCommandErrors>::from_response(&ApduResponse::new(sw, Bytes::new()));
        DeviceActionError::from_command("Test", err)
    }

    #[test]
    fn test_from_command() {
        assert_eq!(from_sw(0x5515), DeviceActionError::DeviceLocked);
        assert_eq!(from_sw(0x5501), DeviceActionError::RefusedByUser);
        assert_eq!(from_sw(0x5502), DeviceActionError::DeviceNotOnboarded);
        assert!(matches!(
            from_sw(0x5223),
            DeviceActionError::Command { command: "Test", error_code: Some(ref code), .. } if code == "5223"
        ));
        assert!(matches!(
            from_sw(0x6f00),
            DeviceActionError::Command { error_code: Some(ref code), .. } if code == "6f00"
        ));
    }
}
