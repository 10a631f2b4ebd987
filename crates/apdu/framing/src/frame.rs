//! Frame and frame header definitions

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FramingError;

/// Tag identifying APDU frames
pub const FRAME_TAG: u8 = 0x05;

/// Length of the channel field
pub const CHANNEL_LENGTH: usize = 2;

/// Length of the tag and index fields
pub const TAG_AND_INDEX_LENGTH: usize = 3;

/// Length of the data length field carried by frame 0
pub const DATA_LENGTH_LENGTH: usize = 2;

/// Header of a single frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Channel, present on USB HID links only
    pub channel: Option<u16>,
    /// Frame tag
    pub tag: u8,
    /// Frame index within the transfer
    pub index: u16,
    /// Total transfer length, present on frame 0 only
    pub data_length: Option<u16>,
}

impl FrameHeader {
    /// Header length for the given layout
    pub const fn header_len(has_channel: bool, first: bool) -> usize {
        let mut len = TAG_AND_INDEX_LENGTH;
        if has_channel {
            len += CHANNEL_LENGTH;
        }
        if first {
            len += DATA_LENGTH_LENGTH;
        }
        len
    }

    /// Length of this header once serialized
    pub const fn len(&self) -> usize {
        Self::header_len(self.channel.is_some(), self.data_length.is_some())
    }

    /// Whether the header is empty, which it never is
    pub const fn is_empty(&self) -> bool {
        false
    }

    /// Append the serialized header to a buffer
    pub fn write_to(&self, buf: &mut BytesMut) {
        if let Some(channel) = self.channel {
            buf.put_u16(channel);
        }
        buf.put_u8(self.tag);
        buf.put_u16(self.index);
        if let Some(data_length) = self.data_length {
            buf.put_u16(data_length);
        }
    }

    /// Parse the header at the start of a raw frame.
    ///
    /// `channel` is whether the link prefixes frames with a channel. Returns the
    /// header and the offset of the payload.
    pub fn parse(raw: &[u8], channel: bool) -> Result<(Self, usize), FramingError> {
        let needed = Self::header_len(channel, false);
        if raw.len() < needed {
            return Err(FramingError::TruncatedFrame {
                len: raw.len(),
                needed,
            });
        }

        let mut offset = 0;
        let channel = if channel {
            offset += CHANNEL_LENGTH;
            Some(u16::from_be_bytes([raw[0], raw[1]]))
        } else {
            None
        };
        let tag = raw[offset];
        let index = u16::from_be_bytes([raw[offset + 1], raw[offset + 2]]);
        offset += TAG_AND_INDEX_LENGTH;

        let data_length = if index == 0 {
            if raw.len() < offset + DATA_LENGTH_LENGTH {
                return Err(FramingError::MissingDataLength);
            }
            let len = u16::from_be_bytes([raw[offset], raw[offset + 1]]);
            offset += DATA_LENGTH_LENGTH;
            Some(len)
        } else {
            None
        };

        Ok((
            Self {
                channel,
                tag,
                index,
                data_length,
            },
            offset,
        ))
    }
}

/// A single frame of a transfer
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    header: FrameHeader,
    payload: Bytes,
    padded_len: usize,
}

impl Frame {
    /// Create a frame. `padded_len` of 0 disables padding.
    pub const fn new(header: FrameHeader, payload: Bytes, padded_len: usize) -> Self {
        Self {
            header,
            payload,
            padded_len,
        }
    }

    /// Frame header
    pub const fn header(&self) -> &FrameHeader {
        &self.header
    }

    /// Frame payload without header or padding
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Serialize, zero-padding up to the frame size when padding is enabled
    pub fn to_bytes(&self) -> Bytes {
        let len = self.header.len() + self.payload.len();
        let mut buf = BytesMut::with_capacity(len.max(self.padded_len));
        self.header.write_to(&mut buf);
        buf.put_slice(&self.payload);
        if self.padded_len > len {
            buf.put_bytes(0, self.padded_len - len);
        }
        buf.freeze()
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("header", &self.header)
            .field("payload", &hex::encode(&self.payload))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_lengths() {
        assert_eq!(FrameHeader::header_len(true, true), 7);
        assert_eq!(FrameHeader::header_len(true, false), 5);
        assert_eq!(FrameHeader::header_len(false, true), 5);
        assert_eq!(FrameHeader::header_len(false, false), 3);
    }

    #[test]
    fn test_parse_first_frame() {
        let raw = hex::decode("0101050000000b01020304").unwrap();
        let (header, offset) = FrameHeader::parse(&raw, true).unwrap();
        assert_eq!(header.channel, Some(0x0101));
        assert_eq!(header.tag, FRAME_TAG);
        assert_eq!(header.index, 0);
        assert_eq!(header.data_length, Some(11));
        assert_eq!(offset, 7);
    }

    #[test]
    fn test_parse_truncated() {
        assert!(matches!(
            FrameHeader::parse(&[0x01, 0x01, 0x05], true),
            Err(FramingError::TruncatedFrame { len: 3, needed: 5 })
        ));
        assert_eq!(
            FrameHeader::parse(&[0x05, 0x00, 0x00, 0x00], false),
            Err(FramingError::MissingDataLength)
        );
    }

    #[test]
    fn test_padding() {
        let header = FrameHeader {
            channel: None,
            tag: FRAME_TAG,
            index: 1,
            data_length: None,
        };
        let frame = Frame::new(header, Bytes::from_static(&[0xaa]), 8);
        assert_eq!(
            frame.to_bytes().as_ref(),
            &[0x05, 0x00, 0x01, 0xaa, 0x00, 0x00, 0x00, 0x00]
        );
    }
}
