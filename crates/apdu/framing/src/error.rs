//! Error types for frame encoding and reassembly

use thiserror::Error;

/// Frame codec error
///
/// The receiver drops any partially reassembled transfer when it reports one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FramingError {
    /// The frame tag is not the APDU tag
    #[error("Invalid frame tag: expected {expected:#04x}, got {actual:#04x}")]
    InvalidTag {
        /// Tag the codec uses
        expected: u8,
        /// Tag found in the frame
        actual: u8,
    },

    /// The frame belongs to another channel
    #[error("Invalid channel: expected {expected:#06x}, got {actual:#06x}")]
    InvalidChannel {
        /// Channel of this connection
        expected: u16,
        /// Channel found in the frame
        actual: u16,
    },

    /// The frame index does not follow the previous one
    #[error("Unexpected frame index: expected {expected}, got {actual}")]
    UnexpectedSequence {
        /// Next index the receiver was waiting for
        expected: u16,
        /// Index found in the frame
        actual: u16,
    },

    /// The frame is shorter than its header
    #[error("Truncated frame: {len} bytes, header needs {needed}")]
    TruncatedFrame {
        /// Length of the raw frame
        len: usize,
        /// Header length required
        needed: usize,
    },

    /// The first frame of a transfer carries no length field
    #[error("First frame is missing the data length")]
    MissingDataLength,

    /// The reassembled payload cannot hold a status word
    #[error("Response too short: {0} bytes")]
    ResponseTooShort(usize),

    /// The frame size cannot hold the frame headers
    #[error("Frame size {frame_size} too small, minimum is {minimum}")]
    FrameSizeTooSmall {
        /// Requested frame size
        frame_size: usize,
        /// Smallest usable frame size
        minimum: usize,
    },

    /// The APDU is longer than a frame length field can describe
    #[error("APDU too long: {0} bytes")]
    ApduTooLong(usize),
}
