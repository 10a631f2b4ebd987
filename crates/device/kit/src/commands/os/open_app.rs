use nexum_apdu_core::{
    Apdu, ApduBuilder, ApduBuilderError, ApduResponse, Command, CommandErrorCodes, CommandResult,
    DeviceModelId, StatusWord, command::check_success,
};
use thiserror::Error;

/// Open an app from the dashboard by name
///
/// The device re-enumerates once the app starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenAppCommand {
    /// Name of the app to open
    pub app_name: String,
}

impl OpenAppCommand {
    /// Open the named app
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
        }
    }
}

/// Failures specific to opening an app
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OpenAppError {
    /// No app with this name is installed (68 07)
    #[error("Unknown application")]
    UnknownApp,

    /// The dashboard is not in a state to open apps (69 85)
    #[error("Conditions of use not satisfied")]
    ConditionsNotSatisfied,

    /// Another app is running (67 0a)
    #[error("Another application is already open")]
    InvalidState,
}

impl CommandErrorCodes for OpenAppError {
    fn from_status(status: StatusWord) -> Option<Self> {
        match status.to_u16() {
            0x6807 => Some(Self::UnknownApp),
            0x6985 => Some(Self::ConditionsNotSatisfied),
            0x670a => Some(Self::InvalidState),
            _ => None,
        }
    }

    fn status(&self) -> StatusWord {
        match self {
            Self::UnknownApp => StatusWord::new(0x68, 0x07),
            Self::ConditionsNotSatisfied => StatusWord::new(0x69, 0x85),
            Self::InvalidState => StatusWord::new(0x67, 0x0a),
        }
    }
}

impl Command for OpenAppCommand {
    type Output = ();
    type Error = OpenAppError;

    fn name(&self) -> &'static str {
        "OpenApp"
    }

    fn apdu(&self) -> Result<Apdu, ApduBuilderError> {
        let mut builder = ApduBuilder::new(0xe0, 0xd8, 0x00, 0x00);
        builder.add_ascii(&self.app_name)?;
        Ok(builder.build())
    }

    fn parse_response(
        &self,
        response: &ApduResponse,
        _device_model: DeviceModelId,
    ) -> CommandResult<(), OpenAppError> {
        check_success(response)
    }

    fn triggers_disconnection(&self) -> bool {
        true
    }
}
