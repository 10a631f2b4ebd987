//! Device descriptors shared by transports and sessions

use std::{fmt, sync::Arc};

use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{connection::DeviceConnection, model::DeviceModel};

/// Identifier of a physical device as seen by one transport
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{_0}")]
pub struct DeviceId(pub String);

impl DeviceId {
    /// Generate a random id, for transports without stable device identifiers
    pub fn random() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identifier of a transport implementation
#[derive(Debug, Display, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{_0}")]
pub struct TransportIdentifier(pub String);

impl From<&str> for TransportIdentifier {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Physical link kind
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionType {
    /// USB HID
    #[display("USB")]
    Usb,
    /// Bluetooth Low Energy
    #[display("BLE")]
    Ble,
    /// Mock server
    #[display("MOCK")]
    Mock,
}

/// A device found during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    /// Device id
    pub id: DeviceId,
    /// Model of the device
    pub device_model: DeviceModel,
    /// Transport that found the device
    pub transport: TransportIdentifier,
    /// Advertised or product name
    pub name: String,
    /// Signal strength, BLE only
    pub rssi: Option<i16>,
}

/// A device with an open connection
#[derive(Clone)]
pub struct ConnectedDevice {
    /// Device id
    pub id: DeviceId,
    /// Model of the device
    pub device_model: DeviceModel,
    /// Transport owning the connection
    pub transport: TransportIdentifier,
    /// Link kind
    pub connection_type: ConnectionType,
    /// Product name
    pub name: String,
    /// Connection APDUs are sent through
    pub connection: Arc<dyn DeviceConnection>,
}

impl fmt::Debug for ConnectedDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectedDevice")
            .field("id", &self.id)
            .field("device_model", &self.device_model.id)
            .field("transport", &self.transport)
            .field("connection_type", &self.connection_type)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Callback invoked once a connection is terminated for good
pub type DisconnectHandler = Arc<dyn Fn(DeviceId) + Send + Sync>;
