//! Splits an outbound APDU into frames

use bytes::Bytes;
use tracing::trace;

use crate::{
    error::FramingError,
    frame::{FRAME_TAG, Frame, FrameHeader},
};

/// Produces the frame sequence of an outbound transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSender {
    frame_size: usize,
    channel: Option<u16>,
    padding: bool,
}

impl FrameSender {
    /// Create a sender for the given link parameters.
    ///
    /// The frame size must leave room for the frame 0 header, and for at least
    /// one payload byte in continuation frames.
    pub const fn new(
        frame_size: usize,
        channel: Option<u16>,
        padding: bool,
    ) -> Result<Self, FramingError> {
        let has_channel = channel.is_some();
        let first = FrameHeader::header_len(has_channel, true);
        let next = FrameHeader::header_len(has_channel, false) + 1;
        let minimum = if first > next { first } else { next };
        if frame_size < minimum {
            return Err(FramingError::FrameSizeTooSmall {
                frame_size,
                minimum,
            });
        }
        Ok(Self {
            frame_size,
            channel,
            padding,
        })
    }

    /// Frame size in bytes
    pub const fn frame_size(&self) -> usize {
        self.frame_size
    }

    /// Channel prefix, if any
    pub const fn channel(&self) -> Option<u16> {
        self.channel
    }

    /// Split raw APDU bytes into frames
    pub fn frames(&self, apdu: &[u8]) -> Result<Vec<Frame>, FramingError> {
        let total = u16::try_from(apdu.len()).map_err(|_| FramingError::ApduTooLong(apdu.len()))?;
        let apdu = Bytes::copy_from_slice(apdu);
        let padded_len = if self.padding { self.frame_size } else { 0 };

        let mut frames = Vec::new();
        let mut offset = 0;
        let mut index: u16 = 0;
        loop {
            let first = index == 0;
            let header = FrameHeader {
                channel: self.channel,
                tag: FRAME_TAG,
                index,
                data_length: first.then_some(total),
            };
            let room = self.frame_size - header.len();
            let end = (offset + room).min(apdu.len());
            frames.push(Frame::new(header, apdu.slice(offset..end), padded_len));
            offset = end;

            if offset >= apdu.len() {
                break;
            }
            index = index
                .checked_add(1)
                .ok_or(FramingError::ApduTooLong(apdu.len()))?;
        }

        trace!(
            apdu = %hex::encode(&apdu),
            frames = frames.len(),
            frame_size = self.frame_size,
            "Split APDU into frames"
        );
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_frame_hid() {
        let sender = FrameSender::new(64, Some(0x0101), true).unwrap();
        let apdu = hex::decode("b001000000").unwrap();
        let frames = sender.frames(&apdu).unwrap();
        assert_eq!(frames.len(), 1);

        let raw = frames[0].to_bytes();
        assert_eq!(raw.len(), 64);
        assert_eq!(&raw[..12], hex::decode("01010500000005b001000000").unwrap().as_slice());
        assert!(raw[12..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_multiple_frames_without_padding() {
        let sender = FrameSender::new(8, None, false).unwrap();
        let apdu: Vec<u8> = (0u8..10).collect();
        let frames = sender.frames(&apdu).unwrap();

        // frame 0: 5 header bytes + 3 payload, then 5 payload bytes per frame
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].payload().as_ref(), &[0, 1, 2]);
        assert_eq!(frames[0].header().data_length, Some(10));
        assert_eq!(frames[1].payload().as_ref(), &[3, 4, 5, 6, 7]);
        assert_eq!(frames[1].header().data_length, None);
        assert_eq!(frames[2].payload().as_ref(), &[8, 9]);
        assert_eq!(frames[2].header().index, 2);
        assert_eq!(frames[2].to_bytes().len(), 5);
    }

    #[test]
    fn test_exact_multiple_has_no_empty_trailer() {
        let sender = FrameSender::new(8, None, true).unwrap();
        let apdu = [0xffu8; 8];
        let frames = sender.frames(&apdu).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].payload().len(), 5);
    }

    #[test]
    fn test_frame_size_too_small() {
        assert_eq!(
            FrameSender::new(6, Some(1), true),
            Err(FramingError::FrameSizeTooSmall {
                frame_size: 6,
                minimum: 7
            })
        );
        assert!(FrameSender::new(5, None, false).is_ok());
    }
}
