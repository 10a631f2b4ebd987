//! Mock transport talking to a mock device server
//!
//! The mock server speaks whole APDUs, so no framing happens on this transport.

mod server;

use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use nexum_apdu_core::{ApduResponse, DeviceModelId};
use parking_lot::Mutex;
use tracing::{debug, warn};

pub use server::InMemoryMockServer;

use crate::{
    connection::DeviceConnection,
    device::{
        ConnectedDevice, ConnectionType, DeviceId, DiscoveredDevice, DisconnectHandler,
        TransportIdentifier,
    },
    error::TransportError,
    model::DeviceModel,
    transport::Transport,
};

/// Identifier of the mock transport
pub const MOCK_TRANSPORT_ID: &str = "MOCK_SERVER";

/// Device advertised by a mock server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockDeviceInfo {
    /// Device id
    pub id: DeviceId,
    /// Display name
    pub name: String,
    /// Simulated model
    pub model: DeviceModelId,
}

/// Mock device server contract
#[async_trait]
pub trait MockServer: Send + Sync + fmt::Debug {
    /// List simulated devices
    async fn scan(&self) -> Result<Vec<MockDeviceInfo>, TransportError>;

    /// Open a session with a device, returning the server session id
    async fn connect(&self, device_id: &DeviceId) -> Result<String, TransportError>;

    /// Send a raw APDU, returning the raw response including the status word
    async fn send(&self, session_id: &str, apdu: Bytes) -> Result<Bytes, TransportError>;

    /// Close a session
    async fn disconnect(&self, session_id: &str) -> Result<(), TransportError>;
}

/// Clears the busy flag when the exchange ends or is dropped
struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Connection to a simulated device
#[derive(Debug)]
pub struct MockDeviceConnection {
    server: Arc<dyn MockServer>,
    session_id: String,
    busy: AtomicBool,
    closed: AtomicBool,
}

impl MockDeviceConnection {
    /// Wrap a server session
    pub fn new(server: Arc<dyn MockServer>, session_id: String) -> Self {
        Self {
            server,
            session_id,
            busy: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Server session id
    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}

#[async_trait]
impl DeviceConnection for MockDeviceConnection {
    async fn do_send_apdu(
        &self,
        apdu: Bytes,
        triggers_disconnection: bool,
        timeout: Option<Duration>,
    ) -> Result<ApduResponse, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Disconnected);
        }
        if self.busy.swap(true, Ordering::AcqRel) {
            return Err(TransportError::AlreadySending);
        }
        let _busy = BusyGuard(&self.busy);
        if triggers_disconnection {
            debug!("Mock devices do not re-enumerate, not waiting for reconnection");
        }

        let send = self.server.send(&self.session_id, apdu);
        let result = match timeout {
            Some(timeout) => tokio::time::timeout(timeout, send)
                .await
                .unwrap_or(Err(TransportError::Timeout)),
            None => send.await,
        };

        let raw = result?;
        ApduResponse::from_bytes(&raw).ok_or_else(|| {
            TransportError::other(format!("mock response too short: {}", hex::encode(&raw)))
        })
    }

    fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.server.disconnect(&self.session_id).await
    }
}

/// Transport backed by a [`MockServer`]
pub struct MockTransport {
    server: Arc<dyn MockServer>,
    connections: Mutex<HashMap<DeviceId, DisconnectHandler>>,
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport")
            .field("server", &self.server)
            .field("connections", &self.connections.lock().len())
            .finish()
    }
}

impl MockTransport {
    /// Create a transport for the given server
    pub fn new(server: Arc<dyn MockServer>) -> Self {
        Self {
            server,
            connections: Mutex::new(HashMap::new()),
        }
    }

    fn discovered(info: MockDeviceInfo) -> DiscoveredDevice {
        DiscoveredDevice {
            id: info.id,
            device_model: DeviceModel::get(info.model),
            transport: TransportIdentifier::from(MOCK_TRANSPORT_ID),
            name: info.name,
            rssi: None,
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn identifier(&self) -> TransportIdentifier {
        TransportIdentifier::from(MOCK_TRANSPORT_ID)
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn start_discovering(&self) -> BoxStream<'static, DiscoveredDevice> {
        let server = self.server.clone();
        futures::stream::once(async move { server.scan().await })
            .flat_map(|scan| {
                let devices = scan.unwrap_or_else(|e| {
                    warn!(error = %e, "Mock server scan failed");
                    Vec::new()
                });
                futures::stream::iter(devices.into_iter().map(Self::discovered))
            })
            .boxed()
    }

    async fn stop_discovering(&self) {}

    async fn list_known_devices(&self) -> Result<Vec<DiscoveredDevice>, TransportError> {
        Ok(self
            .server
            .scan()
            .await?
            .into_iter()
            .map(Self::discovered)
            .collect())
    }

    async fn connect(
        &self,
        device_id: &DeviceId,
        on_disconnect: DisconnectHandler,
    ) -> Result<ConnectedDevice, TransportError> {
        let info = self
            .server
            .scan()
            .await?
            .into_iter()
            .find(|d| &d.id == device_id)
            .ok_or_else(|| TransportError::UnknownDevice(device_id.to_string()))?;
        let session_id = self.server.connect(device_id).await?;
        debug!(device = %device_id, session_id = %session_id, "Connected to mock device");

        self.connections
            .lock()
            .insert(device_id.clone(), on_disconnect);
        Ok(ConnectedDevice {
            id: info.id,
            device_model: DeviceModel::get(info.model),
            transport: self.identifier(),
            connection_type: ConnectionType::Mock,
            name: info.name,
            connection: Arc::new(MockDeviceConnection::new(self.server.clone(), session_id)),
        })
    }

    async fn disconnect(&self, device: &ConnectedDevice) -> Result<(), TransportError> {
        device.connection.disconnect().await?;
        let handler = self.connections.lock().remove(&device.id);
        if let Some(handler) = handler {
            handler(device.id.clone());
        }
        Ok(())
    }
}
