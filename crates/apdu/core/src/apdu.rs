//! APDU command definition and builder
//!
//! Commands always use the short APDU encoding: `CLA INS P1 P2 Lc DATA`, where `Lc`
//! is a single byte and therefore limits the payload to [`APDU_MAX_PAYLOAD`] bytes.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Length of the APDU header (`CLA INS P1 P2 Lc`)
pub const HEADER_LENGTH: usize = 5;

/// Maximum payload carried by a short APDU
pub const APDU_MAX_PAYLOAD: usize = 255;

/// Errors raised while assembling an APDU payload
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApduBuilderError {
    /// Appending the value would exceed the short APDU payload limit
    #[error("Data overflow: cannot append {needed} bytes, {available} remaining")]
    DataOverflow {
        /// Bytes the caller tried to append
        needed: usize,
        /// Bytes still available in the payload
        available: usize,
    },

    /// A length-value field is longer than a single length byte can describe
    #[error("Value overflow: {len} bytes does not fit in a length byte")]
    ValueOverflow {
        /// Length of the offending value
        len: usize,
    },

    /// A hex string could not be decoded
    #[error("Invalid hex string: {0}")]
    InvalidHex(String),
}

/// A command APDU
///
/// The payload is only set through [`ApduBuilder`] or [`Apdu::with_data`], so it
/// never exceeds [`APDU_MAX_PAYLOAD`] and always fits the `Lc` byte.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Apdu {
    /// Command class byte
    pub cla: u8,
    /// Instruction byte
    pub ins: u8,
    /// Parameter 1
    pub p1: u8,
    /// Parameter 2
    pub p2: u8,
    data: Bytes,
}

impl Apdu {
    /// Create a new APDU with an empty payload
    pub const fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: Bytes::new(),
        }
    }

    /// Create an APDU carrying `data`, rejecting payloads over [`APDU_MAX_PAYLOAD`]
    pub fn with_data(
        cla: u8,
        ins: u8,
        p1: u8,
        p2: u8,
        data: impl Into<Bytes>,
    ) -> Result<Self, ApduBuilderError> {
        let data = data.into();
        if data.len() > APDU_MAX_PAYLOAD {
            return Err(ApduBuilderError::DataOverflow {
                needed: data.len(),
                available: APDU_MAX_PAYLOAD,
            });
        }
        Ok(Self {
            cla,
            ins,
            p1,
            p2,
            data,
        })
    }

    /// Command payload
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Serialize to raw bytes. `Lc` is always present, even for an empty payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut buffer = BytesMut::with_capacity(HEADER_LENGTH + self.data.len());
        buffer.put_u8(self.cla);
        buffer.put_u8(self.ins);
        buffer.put_u8(self.p1);
        buffer.put_u8(self.p2);
        buffer.put_u8(self.data.len() as u8);
        buffer.put_slice(&self.data);
        buffer.freeze()
    }

    /// Length of the serialized command
    pub fn len(&self) -> usize {
        HEADER_LENGTH + self.data.len()
    }

    /// Whether the command carries no payload
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether the header matches the given class and instruction
    pub const fn matches(&self, cla: u8, ins: u8) -> bool {
        self.cla == cla && self.ins == ins
    }
}

impl fmt::Debug for Apdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Apdu")
            .field("cla", &format_args!("{:#04x}", self.cla))
            .field("ins", &format_args!("{:#04x}", self.ins))
            .field("p1", &format_args!("{:#04x}", self.p1))
            .field("p2", &format_args!("{:#04x}", self.p2))
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

impl fmt::Display for Apdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.to_bytes()))
    }
}

impl From<Apdu> for Bytes {
    fn from(apdu: Apdu) -> Self {
        apdu.to_bytes()
    }
}

/// Incremental builder for APDU payloads
///
/// Every `add_*` and `encode_lv_*` method checks the remaining payload room before
/// writing anything, so a failed call leaves the builder untouched.
#[derive(Debug, Clone)]
pub struct ApduBuilder {
    cla: u8,
    ins: u8,
    p1: u8,
    p2: u8,
    data: BytesMut,
}

impl ApduBuilder {
    /// Start a builder for the given header
    pub fn new(cla: u8, ins: u8, p1: u8, p2: u8) -> Self {
        Self {
            cla,
            ins,
            p1,
            p2,
            data: BytesMut::new(),
        }
    }

    /// Bytes still available in the payload
    pub fn available_payload_length(&self) -> usize {
        APDU_MAX_PAYLOAD - self.data.len()
    }

    fn ensure_room(&self, needed: usize) -> Result<(), ApduBuilderError> {
        let available = self.available_payload_length();
        if needed > available {
            return Err(ApduBuilderError::DataOverflow { needed, available });
        }
        Ok(())
    }

    /// Append a single byte
    pub fn add_u8(&mut self, value: u8) -> Result<&mut Self, ApduBuilderError> {
        self.ensure_room(1)?;
        self.data.put_u8(value);
        Ok(self)
    }

    /// Append a big-endian 16-bit value
    pub fn add_u16(&mut self, value: u16) -> Result<&mut Self, ApduBuilderError> {
        self.ensure_room(2)?;
        self.data.put_u16(value);
        Ok(self)
    }

    /// Append a big-endian 32-bit value
    pub fn add_u32(&mut self, value: u32) -> Result<&mut Self, ApduBuilderError> {
        self.ensure_room(4)?;
        self.data.put_u32(value);
        Ok(self)
    }

    /// Append raw bytes
    pub fn add_bytes(&mut self, value: &[u8]) -> Result<&mut Self, ApduBuilderError> {
        self.ensure_room(value.len())?;
        self.data.put_slice(value);
        Ok(self)
    }

    /// Append the ASCII bytes of a string
    pub fn add_ascii(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        self.add_bytes(value.as_bytes())
    }

    /// Append the bytes of a hex string, with or without a `0x` prefix
    pub fn add_hex(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        let decoded = decode_hex(value)?;
        self.add_bytes(&decoded)
    }

    /// Append a length-prefixed byte field
    pub fn encode_lv_bytes(&mut self, value: &[u8]) -> Result<&mut Self, ApduBuilderError> {
        let len = u8::try_from(value.len())
            .map_err(|_| ApduBuilderError::ValueOverflow { len: value.len() })?;
        self.ensure_room(value.len() + 1)?;
        self.data.put_u8(len);
        self.data.put_slice(value);
        Ok(self)
    }

    /// Append a length-prefixed ASCII field
    pub fn encode_lv_ascii(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        self.encode_lv_bytes(value.as_bytes())
    }

    /// Append a length-prefixed field decoded from a hex string
    pub fn encode_lv_hex(&mut self, value: &str) -> Result<&mut Self, ApduBuilderError> {
        let decoded = decode_hex(value)?;
        self.encode_lv_bytes(&decoded)
    }

    /// Finish the APDU
    pub fn build(&self) -> Apdu {
        Apdu {
            cla: self.cla,
            ins: self.ins,
            p1: self.p1,
            p2: self.p2,
            data: self.data.clone().freeze(),
        }
    }
}

fn decode_hex(value: &str) -> Result<Vec<u8>, ApduBuilderError> {
    let stripped = value.strip_prefix("0x").unwrap_or(value);
    if stripped.is_empty() {
        return Err(ApduBuilderError::InvalidHex(value.to_string()));
    }
    hex::decode(stripped).map_err(|_| ApduBuilderError::InvalidHex(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_apdu_serializes_lc() {
        let apdu = ApduBuilder::new(0xb0, 0x01, 0x00, 0x00).build();
        assert_eq!(apdu.to_bytes().as_ref(), &[0xb0, 0x01, 0x00, 0x00, 0x00]);
        assert!(apdu.is_empty());
    }

    #[test]
    fn test_builder_fields() {
        let mut builder = ApduBuilder::new(0xe0, 0xd8, 0x00, 0x00);
        builder
            .add_u8(0x01)
            .unwrap()
            .add_u16(0x0203)
            .unwrap()
            .add_u32(0x04050607)
            .unwrap()
            .encode_lv_ascii("BTC")
            .unwrap()
            .add_hex("0xaabb")
            .unwrap();
        let apdu = builder.build();
        assert_eq!(hex::encode(apdu.data()), "0102030405060703425443aabb");
        assert_eq!(apdu.to_bytes()[4] as usize, apdu.data().len());
    }

    #[test]
    fn test_builder_rejects_overflow() {
        let mut builder = ApduBuilder::new(0xe0, 0x00, 0x00, 0x00);
        builder.add_bytes(&[0u8; 255]).unwrap();
        assert_eq!(builder.available_payload_length(), 0);
        assert_eq!(
            builder.add_u8(0x00).unwrap_err(),
            ApduBuilderError::DataOverflow {
                needed: 1,
                available: 0
            }
        );
        // Nothing was written by the failed call
        assert_eq!(builder.build().data().len(), 255);
    }

    #[test]
    fn test_with_data_checks_lc_range() {
        let apdu = Apdu::with_data(0xe0, 0x04, 0x00, 0x00, vec![0x42; 255]).unwrap();
        assert_eq!(apdu.to_bytes()[4], 0xff);
        assert_eq!(apdu.len(), 260);

        assert_eq!(
            Apdu::with_data(0xe0, 0x04, 0x00, 0x00, vec![0x42; 256]).unwrap_err(),
            ApduBuilderError::DataOverflow {
                needed: 256,
                available: 255
            }
        );
    }

    #[test]
    fn test_lv_needs_room_for_length_byte() {
        let mut builder = ApduBuilder::new(0xe0, 0x00, 0x00, 0x00);
        builder.add_bytes(&[0u8; 250]).unwrap();
        assert!(builder.encode_lv_bytes(&[0u8; 5]).is_err());
        assert!(builder.encode_lv_bytes(&[0u8; 4]).is_ok());
        assert_eq!(builder.available_payload_length(), 0);
    }

    #[test]
    fn test_invalid_hex() {
        let mut builder = ApduBuilder::new(0xe0, 0x00, 0x00, 0x00);
        assert!(matches!(
            builder.add_hex("abc"),
            Err(ApduBuilderError::InvalidHex(_))
        ));
        assert!(matches!(
            builder.add_hex("zz"),
            Err(ApduBuilderError::InvalidHex(_))
        ));
        assert!(matches!(
            builder.encode_lv_hex(""),
            Err(ApduBuilderError::InvalidHex(_))
        ));
    }
}
