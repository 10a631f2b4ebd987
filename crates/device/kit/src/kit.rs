//! The device management kit
//!
//! [`DeviceManagementKit`] owns the transports, the session registry and the
//! command executor. It is created once with [`DeviceManagementKitBuilder`]
//! and lives until [`DeviceManagementKit::close`].

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use nexum_apdu_core::{ApduResponse, Command, CommandResult};
use nexum_device_transport::{
    DeviceId, DiscoveredDevice, DisconnectHandler, Transport, TransportIdentifier,
};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::{
    action::{DeviceAction, ExecuteDeviceActionReturnType},
    config::KitConfig,
    error::KitError,
    executor::{BulkApduEvent, CommandExecutor},
    session::{
        DeviceSession, DeviceSessionId, DeviceSessionRegistry, DeviceSessionState,
        SendApduOptions,
    },
};

/// Builder for [`DeviceManagementKit`]
#[derive(Debug, Default)]
pub struct DeviceManagementKitBuilder {
    config: KitConfig,
    transports: Vec<Arc<dyn Transport>>,
}

impl DeviceManagementKitBuilder {
    /// Start with the default configuration and no transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given configuration
    pub fn with_config(mut self, config: KitConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a transport. A transport registered twice under the same
    /// identifier replaces the first one.
    pub fn add_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        let id = transport.identifier();
        self.transports.retain(|t| t.identifier() != id);
        self.transports.push(transport);
        self
    }

    /// Build the kit
    pub fn build(self) -> DeviceManagementKit {
        let registry = Arc::new(DeviceSessionRegistry::new());
        info!(
            transports = ?self.transports.iter().map(|t| t.identifier()).collect::<Vec<_>>(),
            "Device management kit created"
        );
        DeviceManagementKit {
            config: self.config,
            transports: self.transports,
            executor: CommandExecutor::new(registry.clone()),
            registry,
            closed: AtomicBool::new(false),
        }
    }
}

/// Entry point for discovering devices and talking to them
#[derive(Debug)]
pub struct DeviceManagementKit {
    config: KitConfig,
    transports: Vec<Arc<dyn Transport>>,
    registry: Arc<DeviceSessionRegistry>,
    executor: CommandExecutor,
    closed: AtomicBool,
}

impl DeviceManagementKit {
    /// Create a builder
    pub fn builder() -> DeviceManagementKitBuilder {
        DeviceManagementKitBuilder::new()
    }

    /// Configuration new sessions are opened with
    pub const fn config(&self) -> &KitConfig {
        &self.config
    }

    /// Session registry
    pub const fn registry(&self) -> &Arc<DeviceSessionRegistry> {
        &self.registry
    }

    fn ensure_open(&self) -> Result<(), KitError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(KitError::Closed);
        }
        Ok(())
    }

    fn transport(&self, id: &TransportIdentifier) -> Result<&Arc<dyn Transport>, KitError> {
        self.transports
            .iter()
            .find(|t| &t.identifier() == id)
            .ok_or_else(|| KitError::TransportNotFound(id.clone()))
    }

    fn supported_transports(&self) -> impl Iterator<Item = &Arc<dyn Transport>> {
        self.transports.iter().filter(|t| t.is_supported())
    }

    /// Scan for devices on one transport, or on every supported one
    pub fn start_discovering(
        &self,
        transport: Option<&TransportIdentifier>,
    ) -> Result<BoxStream<'static, DiscoveredDevice>, KitError> {
        self.ensure_open()?;
        let streams: Vec<_> = match transport {
            Some(id) => vec![self.transport(id)?.start_discovering()],
            None => self
                .supported_transports()
                .map(|t| t.start_discovering())
                .collect(),
        };
        debug!(transports = streams.len(), "Discovery started");
        Ok(futures::stream::select_all(streams).boxed())
    }

    /// Stop scanning on every transport
    pub async fn stop_discovering(&self) {
        for transport in &self.transports {
            transport.stop_discovering().await;
        }
        debug!("Discovery stopped");
    }

    /// Devices the transports know about without scanning.
    ///
    /// A transport failing to list is skipped.
    pub async fn list_available_devices(&self) -> Result<Vec<DiscoveredDevice>, KitError> {
        self.ensure_open()?;
        let mut devices = Vec::new();
        for transport in self.supported_transports() {
            match transport.list_known_devices().await {
                Ok(known) => devices.extend(known),
                Err(e) => {
                    warn!(transport = %transport.identifier(), error = %e, "Listing devices failed")
                }
            }
        }
        Ok(devices)
    }

    /// Connect to a discovered device and open a session on it.
    ///
    /// Must be called within a tokio runtime.
    #[instrument(level = "debug", skip_all, fields(device = %device.id, transport = %device.transport))]
    pub async fn connect(&self, device: &DiscoveredDevice) -> Result<DeviceSessionId, KitError> {
        self.ensure_open()?;
        if self.registry.find_by_device(&device.id).is_some() {
            return Err(KitError::AlreadyConnected(device.id.clone()));
        }
        let transport = self.transport(&device.transport)?;

        let connected = transport
            .connect(&device.id, self.disconnect_handler())
            .await?;
        let session = DeviceSession::new(connected, self.config.clone());
        let id = session.id();
        self.registry.add(session);
        info!(session = %id, model = %device.device_model.id, "Device connected");
        Ok(id)
    }

    /// Removes the device's session once the transport reports it gone
    fn disconnect_handler(&self) -> DisconnectHandler {
        let registry = Arc::downgrade(&self.registry);
        let runtime = tokio::runtime::Handle::current();
        Arc::new(move |device_id: DeviceId| {
            let Some(registry) = registry.upgrade() else {
                return;
            };
            runtime.spawn(async move {
                let Some(session) = registry.find_by_device(&device_id) else {
                    return;
                };
                info!(session = %session.id(), device = %device_id, "Device disconnected");
                if let Err(e) = registry.remove(&session.id()).await {
                    debug!(error = %e, "Session already removed");
                }
            });
        })
    }

    /// Close a session and disconnect its device
    pub async fn disconnect(&self, session_id: &DeviceSessionId) -> Result<(), KitError> {
        let session = self.registry.get(session_id)?;
        self.registry.remove(session_id).await?;
        let device = session.device();
        self.transport(&device.transport)?.disconnect(device).await?;
        info!(session = %session_id, "Device disconnected");
        Ok(())
    }

    /// Send a raw APDU on a session
    pub async fn send_apdu(
        &self,
        session_id: &DeviceSessionId,
        apdu: Bytes,
        options: SendApduOptions,
    ) -> Result<ApduResponse, KitError> {
        self.ensure_open()?;
        self.registry.get(session_id)?.send_apdu(apdu, options).await
    }

    /// Send a typed command on a session
    pub async fn send_command<C: Command>(
        &self,
        session_id: &DeviceSessionId,
        command: &C,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        self.ensure_open()?;
        self.executor.execute(session_id, command).await
    }

    /// Send raw APDUs in order on a session, stopping at the first failure
    pub fn send_apdus(
        &self,
        session_id: &DeviceSessionId,
        apdus: Vec<Bytes>,
    ) -> Result<BoxStream<'static, BulkApduEvent>, KitError> {
        self.ensure_open()?;
        self.executor.send_apdus(session_id, apdus)
    }

    /// Start a device action on a session
    pub fn execute_device_action<A: DeviceAction>(
        &self,
        session_id: &DeviceSessionId,
        action: A,
    ) -> Result<ExecuteDeviceActionReturnType<A::Output, A::Intermediate>, KitError> {
        self.ensure_open()?;
        Ok(self
            .registry
            .get(session_id)?
            .execute_device_action(action))
    }

    /// Current state of a session
    pub fn get_device_session_state(
        &self,
        session_id: &DeviceSessionId,
    ) -> Result<DeviceSessionState, KitError> {
        Ok(self.registry.get(session_id)?.state())
    }

    /// Subscribe to the state of a session
    pub fn subscribe_device_session_state(
        &self,
        session_id: &DeviceSessionId,
    ) -> Result<watch::Receiver<DeviceSessionState>, KitError> {
        Ok(self.registry.get(session_id)?.subscribe_state())
    }

    /// Switch background polling of a session on or off
    pub fn toggle_refresher(
        &self,
        session_id: &DeviceSessionId,
        enabled: bool,
    ) -> Result<(), KitError> {
        self.registry.get(session_id)?.toggle_refresher(enabled);
        Ok(())
    }

    /// Ids of the open sessions
    pub fn list_connected_devices(&self) -> Vec<DeviceSessionId> {
        self.registry.list().iter().map(DeviceSession::id).collect()
    }

    /// Stop discovery, close every session and refuse further use. Idempotent.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.stop_discovering().await;
        for session in self.registry.list() {
            if let Err(e) = self.disconnect(&session.id()).await {
                debug!(session = %session.id(), error = %e, "Disconnect on close failed");
            }
        }
        info!("Device management kit closed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use nexum_apdu_core::DeviceModelId;
    use nexum_device_transport::{InMemoryMockServer, MockDeviceInfo, MockTransport};

    use super::*;
    use crate::{
        action::os::GetDeviceStatus, commands::os::GetAppAndVersion, session::DeviceStatus,
    };

    fn server() -> Arc<InMemoryMockServer> {
        Arc::new(
            InMemoryMockServer::new()
                .with_device(MockDeviceInfo {
                    id: DeviceId::from("nano"),
                    name: "Nano X".to_string(),
                    model: DeviceModelId::NanoX,
                })
                .with_response(
                    &[0xb0, 0x01],
                    &hex::decode("0105424f4c4f5305312e302e309000").unwrap(),
                ),
        )
    }

    fn kit(server: Arc<InMemoryMockServer>) -> DeviceManagementKit {
        DeviceManagementKit::builder()
            .with_config(KitConfig::default().with_refresher_interval(Duration::from_millis(200)))
            .add_transport(Arc::new(MockTransport::new(server)))
            .build()
    }

    async fn connect(kit: &DeviceManagementKit) -> DeviceSessionId {
        let devices: Vec<_> = kit.start_discovering(None).unwrap().collect().await;
        assert_eq!(devices.len(), 1);
        kit.connect(&devices[0]).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_and_send() {
        let kit = kit(server());
        let id = connect(&kit).await;
        assert_eq!(kit.list_connected_devices(), vec![id]);

        let app = kit
            .send_command(&id, &GetAppAndVersion)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(app.name, "BOLOS");

        let status = kit
            .execute_device_action(&id, GetDeviceStatus::default())
            .unwrap()
            .observable
            .outcome()
            .await
            .unwrap();
        assert_eq!(status.current_app, "BOLOS");
        assert_eq!(
            kit.get_device_session_state(&id).unwrap().device_status,
            DeviceStatus::Connected
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_twice() {
        let kit = kit(server());
        connect(&kit).await;
        let devices = kit.list_available_devices().await.unwrap();
        assert!(matches!(
            kit.connect(&devices[0]).await,
            Err(KitError::AlreadyConnected(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_transport() {
        let kit = kit(server());
        assert!(matches!(
            kit.start_discovering(Some(&TransportIdentifier::from("BLE"))),
            Err(KitError::TransportNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_closes_session() {
        let kit = kit(server());
        let id = connect(&kit).await;
        let mut state = kit.subscribe_device_session_state(&id).unwrap();

        kit.disconnect(&id).await.unwrap();
        assert!(kit.list_connected_devices().is_empty());
        assert!(matches!(
            kit.send_apdu(&id, Bytes::from_static(&[0xb0, 0x01, 0x00, 0x00]), SendApduOptions::default())
                .await,
            Err(KitError::SessionNotFound(_))
        ));
        assert_eq!(state.borrow_and_update().device_status, DeviceStatus::NotConnected);
        assert!(state.changed().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close() {
        let kit = kit(server());
        let id = connect(&kit).await;

        kit.close().await;
        kit.close().await;
        assert!(kit.list_connected_devices().is_empty());
        assert!(matches!(kit.start_discovering(None), Err(KitError::Closed)));
        assert!(matches!(
            kit.send_command(&id, &GetAppAndVersion).await,
            Err(KitError::Closed)
        ));
    }
}
