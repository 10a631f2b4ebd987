use nexum_apdu_core::{
    Apdu, ApduBuilderError, ApduParser, ApduResponse, Command, CommandError, CommandResult,
    DeviceModelId, NoCommandErrors, command::check_success,
};

use crate::session::InstalledApp;

const HASH_LENGTH: usize = 32;

/// List installed apps, one page per exchange
///
/// The first page is requested with `continue_listing == false`; following
/// pages with `true` until an empty page comes back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListAppsCommand {
    /// Whether this requests a follow-up page
    pub continue_listing: bool,
}

impl ListAppsCommand {
    /// Request the first page
    pub const fn first() -> Self {
        Self {
            continue_listing: false,
        }
    }

    /// Request the next page
    pub const fn next() -> Self {
        Self {
            continue_listing: true,
        }
    }

    const FORMAT: u8 = 0x01;
}

fn parse_entry(parser: &mut ApduParser) -> CommandResult<InstalledApp> {
    let entry_len = parser.extract_u8()? as usize;
    let mut entry = ApduParser::from_bytes(parser.extract_field(entry_len)?);
    let blocks = entry.extract_u16()?;
    let flags = entry.extract_u16()?;
    let hash_code_data = hex::encode(entry.extract_field(HASH_LENGTH)?);
    let hash = hex::encode(entry.extract_field(HASH_LENGTH)?);
    let name = entry.extract_lv_string()?;
    Ok(InstalledApp {
        name,
        flags,
        hash_code_data,
        hash,
        blocks,
    })
}

impl Command for ListAppsCommand {
    type Output = Vec<InstalledApp>;
    type Error = NoCommandErrors;

    fn name(&self) -> &'static str {
        "ListApps"
    }

    fn apdu(&self) -> Result<Apdu, ApduBuilderError> {
        let ins = if self.continue_listing { 0xdf } else { 0xde };
        Ok(Apdu::new(0xe0, ins, 0x00, 0x00))
    }

    fn parse_response(
        &self,
        response: &ApduResponse,
        _device_model: DeviceModelId,
    ) -> CommandResult<Vec<InstalledApp>> {
        check_success(response)?;

        let mut parser = ApduParser::new(response);
        if parser.remaining() == 0 {
            return Ok(Vec::new());
        }
        let format = parser.extract_u8()?;
        if format != Self::FORMAT {
            return Err(CommandError::InvalidResponse(format!(
                "unsupported format {format:#04x}"
            )));
        }

        let mut apps = Vec::new();
        while parser.remaining() > 0 {
            apps.push(parse_entry(&mut parser)?);
        }
        Ok(apps)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use bytes::{BufMut, Bytes, BytesMut};

    use super::*;

    /// Raw response listing the given app names
    pub(crate) fn page(names: &[&str]) -> Bytes {
        let mut raw = BytesMut::new();
        if !names.is_empty() {
            raw.put_u8(0x01);
        }
        for (i, name) in names.iter().enumerate() {
            let entry_len = 2 + 2 + 2 * HASH_LENGTH + 1 + name.len();
            raw.put_u8(entry_len as u8);
            raw.put_u16(i as u16 + 1);
            raw.put_u16(0x0800);
            raw.put_slice(&[0xaa; HASH_LENGTH]);
            raw.put_slice(&[0xbb; HASH_LENGTH]);
            raw.put_u8(name.len() as u8);
            raw.put_slice(name.as_bytes());
        }
        raw.put_u16(0x9000);
        raw.freeze()
    }

    fn parse(raw: Bytes) -> CommandResult<Vec<InstalledApp>> {
        ListAppsCommand::first()
            .parse_response(&ApduResponse::from_bytes(&raw).unwrap(), DeviceModelId::Stax)
    }

    #[test]
    fn test_apdu() {
        assert_eq!(
            hex::encode(ListAppsCommand::first().apdu().unwrap().to_bytes()),
            "e0de000000"
        );
        assert_eq!(
            hex::encode(ListAppsCommand::next().apdu().unwrap().to_bytes()),
            "e0df000000"
        );
    }

    #[test]
    fn test_parse_page() {
        let apps = parse(page(&["Bitcoin", "Ethereum"])).unwrap();
        assert_eq!(apps.len(), 2);
        assert_eq!(apps[0].name, "Bitcoin");
        assert_eq!(apps[0].blocks, 1);
        assert_eq!(apps[1].name, "Ethereum");
        assert_eq!(apps[1].flags, 0x0800);
        assert_eq!(apps[1].hash_code_data, "aa".repeat(HASH_LENGTH));
        assert_eq!(apps[1].hash, "bb".repeat(HASH_LENGTH));
    }

    #[test]
    fn test_parse_empty_page() {
        assert_eq!(parse(page(&[])).unwrap(), Vec::new());
    }

    #[test]
    fn test_truncated_entry() {
        let raw = page(&["Bitcoin"]);
        let mut truncated = BytesMut::from(&raw[..raw.len() - 6]);
        truncated.put_u16(0x9000);
        assert!(matches!(
            parse(truncated.freeze()),
            Err(CommandError::InvalidResponse(_))
        ));
    }
}
