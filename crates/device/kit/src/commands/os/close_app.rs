use nexum_apdu_core::{
    Apdu, ApduBuilderError, ApduResponse, Command, CommandResult, DeviceModelId,
    NoCommandErrors, command::check_success,
};

/// Quit the running app and go back to the dashboard
///
/// The device re-enumerates once the app exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CloseApp;

impl Command for CloseApp {
    type Output = ();
    type Error = NoCommandErrors;

    fn name(&self) -> &'static str {
        "CloseApp"
    }

    fn apdu(&self) -> Result<Apdu, ApduBuilderError> {
        Ok(Apdu::new(0xb0, 0xa7, 0x00, 0x00))
    }

    fn parse_response(
        &self,
        response: &ApduResponse,
        _device_model: DeviceModelId,
    ) -> CommandResult<()> {
        check_success(response)
    }

    fn triggers_disconnection(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apdu() {
        assert_eq!(hex::encode(CloseApp.apdu().unwrap().to_bytes()), "b0a7000000");
        assert!(CloseApp.triggers_disconnection());
    }
}
