//! Device model identifiers

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Hardware model of a connected device
///
/// Response parsers receive the model because some payload layouts differ
/// between firmware families.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DeviceModelId {
    /// Nano S
    #[display("nanoS")]
    NanoS,
    /// Nano S Plus
    #[display("nanoSP")]
    NanoSp,
    /// Nano X
    #[display("nanoX")]
    NanoX,
    /// Stax
    #[display("stax")]
    Stax,
    /// Flex
    #[display("flex")]
    Flex,
}
