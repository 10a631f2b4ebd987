//! Reassembles inbound frames into an APDU response

use bytes::{BufMut, Bytes, BytesMut};
use nexum_apdu_core::ApduResponse;
use tracing::{debug, trace};

use crate::{
    error::FramingError,
    frame::{FRAME_TAG, FrameHeader},
};

#[derive(Debug)]
struct PendingTransfer {
    expected_len: usize,
    next_index: u16,
    buffer: BytesMut,
}

/// Stateful reassembler for one link
///
/// Feed every inbound frame to [`handle_frame`](Self::handle_frame). Frame 0 always
/// starts a new transfer; any error drops the transfer in progress.
#[derive(Debug, Default)]
pub struct FrameReceiver {
    channel: Option<u16>,
    pending: Option<PendingTransfer>,
}

impl FrameReceiver {
    /// Create a receiver. Frames must carry `channel` when one is given.
    pub const fn new(channel: Option<u16>) -> Self {
        Self {
            channel,
            pending: None,
        }
    }

    /// Whether a transfer is partially reassembled
    pub const fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Drop any partially reassembled transfer
    pub fn reset(&mut self) {
        self.pending = None;
    }

    /// Process one raw frame.
    ///
    /// Returns `Ok(None)` while more frames are expected and `Ok(Some(response))`
    /// once the declared length has been received, padding stripped.
    pub fn handle_frame(&mut self, raw: &[u8]) -> Result<Option<ApduResponse>, FramingError> {
        let result = self.process(raw);
        if result.is_err() {
            self.pending = None;
        }
        result
    }

    fn process(&mut self, raw: &[u8]) -> Result<Option<ApduResponse>, FramingError> {
        trace!(frame = %hex::encode(raw), "Received frame");

        let (header, offset) = FrameHeader::parse(raw, self.channel.is_some())?;
        self.validate(&header)?;
        let payload = &raw[offset..];

        let pending = match header.data_length {
            Some(len) => {
                if self.pending.is_some() {
                    debug!("Frame 0 received mid-transfer, restarting reassembly");
                }
                self.pending.insert(PendingTransfer {
                    expected_len: len as usize,
                    next_index: 0,
                    buffer: BytesMut::with_capacity(len as usize),
                })
            }
            None => match self.pending.as_mut() {
                Some(pending) => pending,
                None => {
                    return Err(FramingError::UnexpectedSequence {
                        expected: 0,
                        actual: header.index,
                    });
                }
            },
        };

        if header.index != pending.next_index {
            return Err(FramingError::UnexpectedSequence {
                expected: pending.next_index,
                actual: header.index,
            });
        }
        pending.next_index = pending.next_index.wrapping_add(1);
        pending.buffer.put_slice(payload);

        if pending.buffer.len() < pending.expected_len {
            return Ok(None);
        }

        let Some(mut done) = self.pending.take() else {
            return Ok(None);
        };
        done.buffer.truncate(done.expected_len);
        let raw: Bytes = done.buffer.freeze();
        let response =
            ApduResponse::from_bytes(&raw).ok_or(FramingError::ResponseTooShort(raw.len()))?;
        trace!(response = %hex::encode(&raw), "Reassembled response");
        Ok(Some(response))
    }

    fn validate(&self, header: &FrameHeader) -> Result<(), FramingError> {
        if header.tag != FRAME_TAG {
            return Err(FramingError::InvalidTag {
                expected: FRAME_TAG,
                actual: header.tag,
            });
        }
        if let (Some(expected), Some(actual)) = (self.channel, header.channel) {
            if expected != actual {
                return Err(FramingError::InvalidChannel { expected, actual });
            }
        }
        Ok(())
    }
}
