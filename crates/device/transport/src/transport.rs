//! Transport trait implemented by each physical transport

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::{
    device::{ConnectedDevice, DeviceId, DiscoveredDevice, DisconnectHandler, TransportIdentifier},
    error::TransportError,
};

/// Discovery and connection management for one kind of link
///
/// Discovery never goes through a device session, so it can run while sessions
/// are exchanging APDUs.
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Identifier used to route connection requests to this transport
    fn identifier(&self) -> TransportIdentifier;

    /// Whether the transport can run in the current environment
    fn is_supported(&self) -> bool;

    /// Start scanning, yielding devices as they are found
    fn start_discovering(&self) -> BoxStream<'static, DiscoveredDevice>;

    /// Stop any scan in progress
    async fn stop_discovering(&self);

    /// Devices already known to the transport without scanning
    async fn list_known_devices(&self) -> Result<Vec<DiscoveredDevice>, TransportError>;

    /// Open a connection to a discovered device.
    ///
    /// `on_disconnect` is called once the connection terminates for good.
    async fn connect(
        &self,
        device_id: &DeviceId,
        on_disconnect: DisconnectHandler,
    ) -> Result<ConnectedDevice, TransportError>;

    /// Close the connection to a device
    async fn disconnect(&self, device: &ConnectedDevice) -> Result<(), TransportError>;
}
