//! Device connections and transports
//!
//! This crate binds the APDU frame codec to physical links:
//!
//! - [`DeviceConnection`] is the contract sessions send APDUs through
//! - [`UsbHidDeviceConnection`] and [`BleDeviceConnection`] drive any [`FrameLink`]
//!   through the shared [`FramedConnection`] engine, including the reconnection
//!   dance of commands that make the device re-enumerate
//! - [`Transport`] covers discovery and connection management, with
//!   [`MockTransport`] as the in-tree implementation
//!
//! Transport failures are returned as [`TransportError`] values; nothing here retries.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod ble;
pub mod connection;
pub mod device;
pub mod error;
pub mod framed;
pub mod hid;
pub mod memory;
pub mod mock;
pub mod model;
pub mod transport;

pub use ble::BleDeviceConnection;
pub use connection::{DeviceConnection, FrameLink};
pub use device::{
    ConnectedDevice, ConnectionType, DeviceId, DisconnectHandler, DiscoveredDevice,
    TransportIdentifier,
};
pub use error::TransportError;
pub use framed::{FramedConnection, LinkState};
pub use hid::{HidConnectionOptions, UsbHidDeviceConnection};
pub use mock::{InMemoryMockServer, MockDeviceInfo, MockServer, MockTransport};
pub use model::DeviceModel;
pub use transport::Transport;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        ConnectedDevice, ConnectionType, DeviceConnection, DeviceId, DeviceModel,
        DiscoveredDevice, FrameLink, Transport, TransportError, TransportIdentifier,
    };
}
