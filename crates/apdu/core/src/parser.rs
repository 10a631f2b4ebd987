//! Sequential reader over response data

use bytes::Bytes;
use thiserror::Error;

use crate::response::ApduResponse;

/// Errors raised while reading response fields
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApduParserError {
    /// The field extends past the end of the response data
    #[error("Out of bounds: needed {needed} bytes at offset {offset}, {remaining} remaining")]
    OutOfBounds {
        /// Cursor position when the read was attempted
        offset: usize,
        /// Bytes the read needed
        needed: usize,
        /// Bytes left after the cursor
        remaining: usize,
    },

    /// A text field is not valid UTF-8
    #[error("Invalid UTF-8 in field at offset {0}")]
    InvalidUtf8(usize),
}

/// Cursor over the data of an [`ApduResponse`]
///
/// Failed reads never advance the cursor.
#[derive(Debug, Clone)]
pub struct ApduParser {
    data: Bytes,
    index: usize,
}

impl ApduParser {
    /// Start parsing the given response
    pub fn new(response: &ApduResponse) -> Self {
        Self::from_bytes(response.data().clone())
    }

    /// Start parsing raw bytes
    pub const fn from_bytes(data: Bytes) -> Self {
        Self { data, index: 0 }
    }

    /// Whether the data holds at least `length` bytes overall
    pub fn test_minimal_length(&self, length: usize) -> bool {
        length <= self.data.len()
    }

    /// Current cursor position
    pub const fn current_index(&self) -> usize {
        self.index
    }

    /// Bytes left after the cursor
    pub fn remaining(&self) -> usize {
        self.data.len() - self.index
    }

    /// Move the cursor back to the start
    pub const fn reset(&mut self) {
        self.index = 0;
    }

    fn take(&mut self, needed: usize) -> Result<Bytes, ApduParserError> {
        if needed > self.remaining() {
            return Err(ApduParserError::OutOfBounds {
                offset: self.index,
                needed,
                remaining: self.remaining(),
            });
        }
        let field = self.data.slice(self.index..self.index + needed);
        self.index += needed;
        Ok(field)
    }

    /// Read one byte
    pub fn extract_u8(&mut self) -> Result<u8, ApduParserError> {
        Ok(self.take(1)?[0])
    }

    /// Read a big-endian 16-bit value
    pub fn extract_u16(&mut self) -> Result<u16, ApduParserError> {
        let field = self.take(2)?;
        Ok(u16::from_be_bytes([field[0], field[1]]))
    }

    /// Read a big-endian 32-bit value
    pub fn extract_u32(&mut self) -> Result<u32, ApduParserError> {
        let field = self.take(4)?;
        Ok(u32::from_be_bytes([field[0], field[1], field[2], field[3]]))
    }

    /// Read a fixed-length field
    pub fn extract_field(&mut self, length: usize) -> Result<Bytes, ApduParserError> {
        self.take(length)
    }

    /// Read a field prefixed by a one byte length
    pub fn extract_lv(&mut self) -> Result<Bytes, ApduParserError> {
        let start = self.index;
        let length = self.extract_u8()? as usize;
        self.take(length).inspect_err(|_| self.index = start)
    }

    /// Read a length-prefixed field as a string
    pub fn extract_lv_string(&mut self) -> Result<String, ApduParserError> {
        let start = self.index;
        let field = self.extract_lv()?;
        String::from_utf8(field.to_vec()).map_err(|_| {
            self.index = start;
            ApduParserError::InvalidUtf8(start)
        })
    }

    /// Read all remaining bytes
    pub fn extract_remaining(&mut self) -> Bytes {
        let field = self.data.slice(self.index..);
        self.index = self.data.len();
        field
    }
}
