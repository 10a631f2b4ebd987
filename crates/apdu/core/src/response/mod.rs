//! APDU response definitions
//!
//! A response is the reassembled payload returned by the device: response data
//! followed by a two-byte big-endian status word.

pub mod status;

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use tracing::trace;

use status::StatusWord;

/// Response to a command APDU
#[derive(Clone, PartialEq, Eq)]
pub struct ApduResponse {
    /// Status word trailer
    status: StatusWord,
    /// Response data without the status word
    data: Bytes,
}

impl ApduResponse {
    /// Create a response from its parts
    pub fn new(status: impl Into<StatusWord>, data: Bytes) -> Self {
        Self {
            status: status.into(),
            data,
        }
    }

    /// Create a success response
    pub const fn success(data: Bytes) -> Self {
        Self {
            status: status::common::SUCCESS,
            data,
        }
    }

    /// Split a raw buffer into data and status word.
    ///
    /// Returns `None` if the buffer is shorter than a status word.
    pub fn from_bytes(raw: &Bytes) -> Option<Self> {
        if raw.len() < 2 {
            return None;
        }
        let split = raw.len() - 2;
        let status = StatusWord::new(raw[split], raw[split + 1]);
        let data = raw.slice(..split);

        trace!(
            sw1 = format_args!("{:#04x}", status.sw1),
            sw2 = format_args!("{:#04x}", status.sw2),
            data_len = data.len(),
            "Parsed APDU response"
        );

        Some(Self { status, data })
    }

    /// Status word
    pub const fn status(&self) -> StatusWord {
        self.status
    }

    /// Response data
    pub const fn data(&self) -> &Bytes {
        &self.data
    }

    /// Whether the status word is `90 00`
    pub const fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// Status word rendered as a lowercase hex string, e.g. `"5515"`
    pub fn status_hex(&self) -> String {
        self.status.to_hex()
    }

    /// Serialize back to `data || sw1 sw2`
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.data.len() + 2);
        buf.put_slice(&self.data);
        buf.put_u8(self.status.sw1);
        buf.put_u8(self.status.sw2);
        buf.freeze()
    }
}

impl fmt::Debug for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApduResponse")
            .field("status", &self.status)
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

impl fmt::Display for ApduResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", hex::encode(&self.data), self.status)
    }
}
