//! Frame codec for APDU transfers over small-MTU links
//!
//! USB HID reports and BLE characteristic writes carry far fewer bytes than a
//! typical APDU, so each transfer is split into fixed-size frames:
//!
//! ```text
//! [channel (2B)] tag (1B, 0x05) index (2B BE) [length (2B BE), frame 0 only] payload
//! ```
//!
//! The only framing information is the total length declared in frame 0. The
//! [`FrameSender`] produces the frames of an outbound APDU and the [`FrameReceiver`]
//! reassembles inbound frames into an [`ApduResponse`](nexum_apdu_core::ApduResponse).
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod frame;
pub mod receiver;
pub mod sender;

pub use error::FramingError;
pub use frame::{FRAME_TAG, Frame, FrameHeader};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{FRAME_TAG, Frame, FrameHeader, FrameReceiver, FrameSender, FramingError};
}
