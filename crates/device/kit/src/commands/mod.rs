//! Typed commands understood by the device OS
//!
//! App-specific commands live with the apps; these are the ones every device
//! answers, whatever app is running.

pub mod os;
