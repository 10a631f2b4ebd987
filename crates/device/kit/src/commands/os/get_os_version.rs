use nexum_apdu_core::{
    Apdu, ApduBuilderError, ApduParser, ApduResponse, Command, CommandResult, DeviceModelId,
    NoCommandErrors, command::check_success,
};

use crate::session::FirmwareVersion;

/// Query the firmware versions from the dashboard
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GetOsVersion;

/// Response of [`GetOsVersion`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsVersion {
    /// Target id of the secure element
    pub target_id: u32,
    /// Secure element OS version
    pub se_version: String,
    /// Secure element flags, hex encoded
    pub se_flags: String,
    /// MCU SEPH version
    pub mcu_seph_version: String,
    /// MCU bootloader version
    pub mcu_bootloader_version: Option<String>,
    /// Hardware revision, hex encoded
    pub hw_version: Option<String>,
}

impl OsVersion {
    /// Whether the device is running its bootloader rather than the OS
    pub const fn is_bootloader(&self) -> bool {
        self.target_id & 0xf000_0000 != 0x3000_0000
    }

    /// Versions in the form kept on the session state
    pub fn firmware_version(&self) -> FirmwareVersion {
        FirmwareVersion {
            os: self.se_version.clone(),
            mcu: self.mcu_seph_version.clone(),
            bootloader: self.mcu_bootloader_version.clone(),
        }
    }
}

impl Command for GetOsVersion {
    type Output = OsVersion;
    type Error = NoCommandErrors;

    fn name(&self) -> &'static str {
        "GetOsVersion"
    }

    fn apdu(&self) -> Result<Apdu, ApduBuilderError> {
        Ok(Apdu::new(0xe0, 0x01, 0x00, 0x00))
    }

    fn parse_response(
        &self,
        response: &ApduResponse,
        _device_model: DeviceModelId,
    ) -> CommandResult<OsVersion> {
        check_success(response)?;

        let mut parser = ApduParser::new(response);
        let target_id = parser.extract_u32()?;
        let se_version = parser.extract_lv_string()?;
        let se_flags = hex::encode(parser.extract_lv()?);
        let mcu_seph_version = parser.extract_lv_string()?;
        let mcu_bootloader_version = parser.extract_lv_string().ok();
        let hw_version = parser.extract_lv().ok().map(hex::encode);

        Ok(OsVersion {
            target_id,
            se_version,
            se_flags,
            mcu_seph_version,
            mcu_bootloader_version,
            hw_version,
        })
    }
}
