//! Typed device commands
//!
//! A [`Command`] pairs the APDU it sends with a parser for the response. Parsers
//! resolve non-success status words through a two-tier dictionary: the command's
//! own [`CommandErrorCodes`] first, then [`GlobalCommandError`], and finally an
//! unknown-code error that keeps the raw hex status.

pub mod global;

use std::{error::Error as StdError, fmt};

use thiserror::Error;

use crate::{
    apdu::{Apdu, ApduBuilderError},
    device::DeviceModelId,
    parser::ApduParserError,
    response::{ApduResponse, status::StatusWord},
};
use global::GlobalCommandError;

/// Command-specific status word dictionary
pub trait CommandErrorCodes: StdError + Clone + Send + Sync + 'static {
    /// Map a status word to a command-specific error, if this command knows it
    fn from_status(status: StatusWord) -> Option<Self>;

    /// The status word this error was decoded from
    fn status(&self) -> StatusWord;
}

/// Dictionary for commands without specific error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoCommandErrors {}

impl fmt::Display for NoCommandErrors {
    fn fmt(&self, _: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {}
    }
}

impl StdError for NoCommandErrors {}

impl CommandErrorCodes for NoCommandErrors {
    fn from_status(_: StatusWord) -> Option<Self> {
        None
    }

    fn status(&self) -> StatusWord {
        match *self {}
    }
}

/// Failure of a typed command
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError<E: CommandErrorCodes> {
    /// Status word known to the command's own dictionary
    #[error(transparent)]
    Command(E),

    /// Status word known to the global dictionary
    #[error(transparent)]
    Global(#[from] GlobalCommandError),

    /// Status word unknown to both dictionaries
    #[error("Unexpected status word {error_code}: {message}")]
    Unknown {
        /// Raw status word as lowercase hex
        error_code: String,
        /// Human readable description
        message: &'static str,
    },

    /// Successful status but the payload could not be parsed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// The command parameters could not be encoded into an APDU
    #[error("Invalid command: {0}")]
    InvalidCommand(#[from] ApduBuilderError),
}

impl<E: CommandErrorCodes> CommandError<E> {
    /// Resolve a non-success response through the command and global dictionaries
    pub fn from_response(response: &ApduResponse) -> Self {
        let status = response.status();
        if let Some(err) = E::from_status(status) {
            return Self::Command(err);
        }
        if let Some(err) = GlobalCommandError::from_status(status) {
            return Self::Global(err);
        }
        Self::Unknown {
            error_code: status.to_hex(),
            message: status.description(),
        }
    }

    /// Raw status word as lowercase hex, when the error came from the device
    pub fn error_code(&self) -> Option<String> {
        match self {
            Self::Command(err) => Some(err.status().to_hex()),
            Self::Global(err) => Some(err.status().to_hex()),
            Self::Unknown { error_code, .. } => Some(error_code.clone()),
            Self::InvalidResponse(_) | Self::InvalidCommand(_) => None,
        }
    }

    /// Whether the device reported being locked
    pub const fn is_device_locked(&self) -> bool {
        matches!(self, Self::Global(GlobalCommandError::DeviceLocked))
    }

    /// Convert the command-specific dictionary into another one
    pub fn map_command<F, O>(self, f: F) -> CommandError<O>
    where
        O: CommandErrorCodes,
        F: FnOnce(E) -> CommandError<O>,
    {
        match self {
            Self::Command(err) => f(err),
            Self::Global(err) => CommandError::Global(err),
            Self::Unknown {
                error_code,
                message,
            } => CommandError::Unknown {
                error_code,
                message,
            },
            Self::InvalidResponse(msg) => CommandError::InvalidResponse(msg),
            Self::InvalidCommand(err) => CommandError::InvalidCommand(err),
        }
    }
}

impl<E: CommandErrorCodes> From<ApduParserError> for CommandError<E> {
    fn from(err: ApduParserError) -> Self {
        Self::InvalidResponse(err.to_string())
    }
}

/// Result of a typed command: device failures are values, not panics or transport errors
pub type CommandResult<T, E = NoCommandErrors> = Result<T, CommandError<E>>;

/// A typed command sent to the device
///
/// Parameters live in the implementing type, so `apdu` and `parse_response`
/// only need `&self`.
pub trait Command: Send + Sync + fmt::Debug {
    /// Parsed success value
    type Output: fmt::Debug + Send + 'static;

    /// Command-specific status word dictionary
    type Error: CommandErrorCodes;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Build the APDU for this command
    fn apdu(&self) -> Result<Apdu, ApduBuilderError>;

    /// Parse the device response
    fn parse_response(
        &self,
        response: &ApduResponse,
        device_model: DeviceModelId,
    ) -> CommandResult<Self::Output, Self::Error>;

    /// Whether a successful exchange makes the device re-enumerate
    fn triggers_disconnection(&self) -> bool {
        false
    }
}

/// Return the global/command error for a non-success response, or continue
///
/// Shared by parsers as the first line of `parse_response`.
pub fn check_success<E: CommandErrorCodes>(response: &ApduResponse) -> CommandResult<(), E> {
    if response.is_success() {
        Ok(())
    } else {
        Err(CommandError::from_response(response))
    }
}
