use bytes::Bytes;
use nexum_apdu_core::{
    Apdu, ApduBuilderError, ApduParser, ApduResponse, Command, CommandError, CommandResult,
    DeviceModelId, NoCommandErrors, command::check_success,
};

/// Query the running app, or `BOLOS` on the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetAppAndVersion;

/// Response of [`GetAppAndVersion`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppAndVersion {
    /// App name
    pub name: String,
    /// App version
    pub version: String,
    /// App flags, when reported
    pub flags: Option<Bytes>,
}

impl GetAppAndVersion {
    /// Instruction class
    pub const CLA: u8 = 0xb0;
    /// Instruction
    pub const INS: u8 = 0x01;

    const FORMAT: u8 = 0x01;

    /// Whether a raw APDU is this command
    pub fn is_apdu(apdu: &[u8]) -> bool {
        apdu.len() >= 2 && apdu[0] == Self::CLA && apdu[1] == Self::INS
    }
}

impl Command for GetAppAndVersion {
    type Output = AppAndVersion;
    type Error = NoCommandErrors;

    fn name(&self) -> &'static str {
        "GetAppAndVersion"
    }

    fn apdu(&self) -> Result<Apdu, ApduBuilderError> {
        Ok(Apdu::new(Self::CLA, Self::INS, 0x00, 0x00))
    }

    fn parse_response(
        &self,
        response: &ApduResponse,
        _device_model: DeviceModelId,
    ) -> CommandResult<AppAndVersion> {
        check_success(response)?;

        let mut parser = ApduParser::new(response);
        let format = parser.extract_u8()?;
        if format != Self::FORMAT {
            return Err(CommandError::InvalidResponse(format!(
                "unsupported format {format:#04x}"
            )));
        }
        let name = parser.extract_lv_string()?;
        let version = parser.extract_lv_string()?;
        let flags = (parser.remaining() > 0)
            .then(|| parser.extract_lv())
            .transpose()?;

        Ok(AppAndVersion {
            name,
            version,
            flags,
        })
    }
}
