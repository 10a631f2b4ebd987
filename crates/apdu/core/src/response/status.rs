//! Status word definitions for APDU responses

use std::fmt;

use tracing::Level;

/// Status Word (SW1-SW2) from an APDU response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusWord {
    /// First status byte (SW1)
    pub sw1: u8,
    /// Second status byte (SW2)
    pub sw2: u8,
}

impl StatusWord {
    /// Create a new status word
    pub const fn new(sw1: u8, sw2: u8) -> Self {
        Self { sw1, sw2 }
    }

    /// Create from a u16 value (SW1 | SW2)
    pub const fn from_u16(status: u16) -> Self {
        Self {
            sw1: (status >> 8) as u8,
            sw2: status as u8,
        }
    }

    /// Convert to a u16 value (SW1 | SW2)
    pub const fn to_u16(&self) -> u16 {
        ((self.sw1 as u16) << 8) | (self.sw2 as u16)
    }

    /// Lowercase four character hex rendering, the form error codes are keyed by
    pub fn to_hex(&self) -> String {
        format!("{:02x}{:02x}", self.sw1, self.sw2)
    }

    /// Check if this status word indicates success (90 00)
    pub const fn is_success(&self) -> bool {
        self.sw1 == 0x90 && self.sw2 == 0x00
    }

    /// Check if the device reports being locked (55 15)
    pub const fn is_device_locked(&self) -> bool {
        self.sw1 == 0x55 && self.sw2 == 0x15
    }

    /// Check if the user refused the action on the device (55 01)
    pub const fn is_refused(&self) -> bool {
        self.sw1 == 0x55 && self.sw2 == 0x01
    }

    /// Check if the class byte was rejected (6E 00), usually the wrong app is open
    pub const fn is_class_not_supported(&self) -> bool {
        self.sw1 == 0x6E && self.sw2 == 0x00
    }

    /// Check if the instruction was rejected (6D 00)
    pub const fn is_instruction_not_supported(&self) -> bool {
        self.sw1 == 0x6D && self.sw2 == 0x00
    }

    /// Get the appropriate tracing level for this status word
    pub const fn tracing_level(&self) -> Level {
        if self.is_success() {
            Level::DEBUG
        } else if self.is_device_locked() || self.is_refused() {
            // Expected user-driven states
            Level::INFO
        } else {
            // Errors
            Level::WARN
        }
    }

    /// Get a description of this status word
    pub const fn description(&self) -> &'static str {
        match (self.sw1, self.sw2) {
            (0x90, 0x00) => "Success",
            (0x55, 0x01) => "Action refused by the user",
            (0x55, 0x02) => "PIN not set",
            (0x55, 0x15) => "Device locked",
            (0x52, 0x23) => "Device internal error",
            (0x51, 0x23) => "Application not installed",
            (0x66, 0x2E) => "Invalid state",
            (0x67, 0x00) => "Wrong length",
            (0x68, 0x07) => "Unknown application",
            (0x69, 0x82) => "Security status not satisfied",
            (0x69, 0x85) => "Conditions of use not satisfied",
            (0x6A, 0x80) => "Incorrect parameters in the data field",
            (0x6A, 0x84) => "Not enough memory space",
            (0x6A, 0x86) => "Incorrect parameters P1-P2",
            (0x6B, 0x00) => "Wrong parameters P1-P2",
            (0x6D, 0x00) => "Instruction code not supported or invalid",
            (0x6E, 0x00) => "Class not supported",
            (0x6F, 0x00) => "No precise diagnosis",
            _ => "Unknown status word",
        }
    }
}

impl From<(u8, u8)> for StatusWord {
    fn from(tuple: (u8, u8)) -> Self {
        Self::new(tuple.0, tuple.1)
    }
}

impl From<u16> for StatusWord {
    fn from(status: u16) -> Self {
        Self::from_u16(status)
    }
}

impl From<StatusWord> for u16 {
    fn from(status: StatusWord) -> Self {
        status.to_u16()
    }
}

impl fmt::Display for StatusWord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02X} {:02X}", self.sw1, self.sw2)
    }
}

/// Common status words
pub mod common {
    use super::StatusWord;

    /// Success (90 00)
    pub const SUCCESS: StatusWord = StatusWord::new(0x90, 0x00);

    /// Action refused by the user (55 01)
    pub const ACTION_REFUSED: StatusWord = StatusWord::new(0x55, 0x01);

    /// PIN not set (55 02)
    pub const PIN_NOT_SET: StatusWord = StatusWord::new(0x55, 0x02);

    /// Device locked (55 15)
    pub const DEVICE_LOCKED: StatusWord = StatusWord::new(0x55, 0x15);

    /// Device internal error (52 23)
    pub const DEVICE_INTERNAL_ERROR: StatusWord = StatusWord::new(0x52, 0x23);

    /// Unknown application (68 07)
    pub const UNKNOWN_APPLICATION: StatusWord = StatusWord::new(0x68, 0x07);

    /// Conditions of use not satisfied (69 85)
    pub const CONDITIONS_NOT_SATISFIED: StatusWord = StatusWord::new(0x69, 0x85);

    /// Invalid instruction (6D 00)
    pub const INVALID_INSTRUCTION: StatusWord = StatusWord::new(0x6D, 0x00);

    /// Class not supported (6E 00)
    pub const CLASS_NOT_SUPPORTED: StatusWord = StatusWord::new(0x6E, 0x00);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_word_from_to_u16() {
        let sw = StatusWord::from_u16(0x5515);
        assert_eq!(sw.sw1, 0x55);
        assert_eq!(sw.sw2, 0x15);
        assert_eq!(sw.to_u16(), 0x5515);
        assert_eq!(sw.to_hex(), "5515");
    }

    #[test]
    fn test_status_word_is_methods() {
        assert!(StatusWord::new(0x90, 0x00).is_success());
        assert!(StatusWord::new(0x55, 0x15).is_device_locked());
        assert!(StatusWord::new(0x55, 0x01).is_refused());
        assert!(StatusWord::new(0x6E, 0x00).is_class_not_supported());
        assert!(StatusWord::new(0x6D, 0x00).is_instruction_not_supported());
    }

    #[test]
    fn test_status_word_tracing_level() {
        assert_eq!(common::SUCCESS.tracing_level(), Level::DEBUG);
        assert_eq!(common::DEVICE_LOCKED.tracing_level(), Level::INFO);
        assert_eq!(common::ACTION_REFUSED.tracing_level(), Level::INFO);
        assert_eq!(common::PIN_NOT_SET.tracing_level(), Level::WARN);
        assert_eq!(common::DEVICE_INTERNAL_ERROR.tracing_level(), Level::WARN);
    }

    #[test]
    fn test_status_word_description() {
        assert_eq!(common::SUCCESS.description(), "Success");
        assert_eq!(common::DEVICE_LOCKED.description(), "Device locked");
        assert_eq!(
            StatusWord::new(0x12, 0x34).description(),
            "Unknown status word"
        );
    }
}
