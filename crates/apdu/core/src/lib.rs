//! Core types for APDU (Application Protocol Data Unit) exchanges with hardware wallets
//!
//! This crate provides the foundational types shared by every layer of the device stack:
//!
//! - [`Apdu`] commands and the [`ApduBuilder`] used to assemble their payloads
//! - [`ApduResponse`] and its [`StatusWord`] trailer
//! - [`ApduParser`] for walking response payloads field by field
//! - The [`Command`] trait that pairs an APDU with a typed response parser
//! - The two-tier status word dictionary ([`GlobalCommandError`] behind command-specific codes)
//!
//! Device-reported failures are never raised as errors of the exchange itself: they are
//! returned as [`CommandResult`] values so callers can match on them exhaustively.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

pub mod apdu;
pub mod command;
pub mod device;
pub mod parser;
pub mod response;

pub use apdu::{APDU_MAX_PAYLOAD, Apdu, ApduBuilder, ApduBuilderError};
pub use command::{
    Command, CommandError, CommandErrorCodes, CommandResult, NoCommandErrors,
    global::GlobalCommandError,
};
pub use device::DeviceModelId;
pub use parser::{ApduParser, ApduParserError};
pub use response::ApduResponse;
pub use response::status::StatusWord;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    // Core types
    pub use crate::{Bytes, BytesMut, DeviceModelId};

    // Command related
    pub use crate::apdu::{Apdu, ApduBuilder, ApduBuilderError};
    pub use crate::command::global::GlobalCommandError;
    pub use crate::command::{
        Command, CommandError, CommandErrorCodes, CommandResult, NoCommandErrors,
    };

    // Response related
    pub use crate::parser::{ApduParser, ApduParserError};
    pub use crate::response::ApduResponse;
    pub use crate::response::status::{StatusWord, common as status};
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let apdu = ApduBuilder::new(0xb0, 0x01, 0x00, 0x00).build();
        assert_eq!(apdu.cla, 0xb0);
        assert_eq!(apdu.ins, 0x01);
        assert_eq!(apdu.p1, 0x00);
        assert_eq!(apdu.p2, 0x00);

        let data = Bytes::from_static(&[0x01, 0x02, 0x03]);
        let resp = ApduResponse::new(StatusWord::new(0x90, 0x00), data.clone());
        assert!(resp.is_success());
        assert_eq!(resp.data(), &data);
    }
}
