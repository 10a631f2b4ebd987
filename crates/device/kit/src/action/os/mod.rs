//! Device actions driving the device OS
//!
//! The actions share their flows: opening an app starts with the device status
//! check, listing apps goes through the dashboard, and the in-app actions open
//! their app first.

mod call_task_in_app;
mod get_device_status;
mod go_to_dashboard;
mod list_apps;
mod open_app;
mod send_command_in_app;

pub use call_task_in_app::CallTaskInApp;
pub use get_device_status::{DeviceStatusOutput, GetDeviceStatus};
pub use go_to_dashboard::GoToDashboard;
pub use list_apps::ListApps;
pub use open_app::OpenApp;
pub use send_command_in_app::SendCommandInApp;

use std::time::Duration;

use nexum_apdu_core::Command;

use super::{ActionContext, DeviceActionError, UserInteractionRequired};

/// Context of the OS actions
pub type OsActionContext = ActionContext<UserInteractionRequired>;

fn unlock_timeout(ctx: &OsActionContext, requested: Option<Duration>) -> Duration {
    requested.unwrap_or(ctx.api().config().unlock_timeout)
}

/// Send a command, turning any failure into an action error
async fn run_command<C: Command>(
    ctx: &OsActionContext,
    command: &C,
) -> Result<C::Output, DeviceActionError> {
    ctx.api()
        .send_command(command)
        .await?
        .map_err(|e| DeviceActionError::from_command(command.name(), e))
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use async_trait::async_trait;
    use bytes::Bytes;
    use nexum_apdu_core::DeviceModelId;
    use nexum_device_transport::{
        DeviceId, InMemoryMockServer, MockDeviceInfo, MockServer, MockTransport, Transport,
        TransportError,
    };

    use crate::{config::KitConfig, session::DeviceSession};

    pub(crate) const DASHBOARD: &str = "0105424f4c4f5305312e302e309000";
    pub(crate) const BITCOIN: &str = "0107426974636f696e05322e312e309000";

    pub(crate) fn server() -> Arc<InMemoryMockServer> {
        Arc::new(InMemoryMockServer::new().with_device(MockDeviceInfo {
            id: DeviceId::from("mock"),
            name: "Mock".to_string(),
            model: DeviceModelId::NanoSp,
        }))
    }

    pub(crate) fn answer(server: &InMemoryMockServer, prefix: &[u8], raw: &str) {
        server.push_response(prefix, &hex::decode(raw).unwrap());
    }

    pub(crate) fn answer_once(server: &InMemoryMockServer, prefix: &[u8], raw: &str) {
        server.push_response_once(prefix, &hex::decode(raw).unwrap());
    }

    /// Never answers APDUs starting with the given prefix
    #[derive(Debug)]
    pub(crate) struct HangingServer {
        inner: Arc<InMemoryMockServer>,
        prefix: Vec<u8>,
    }

    impl HangingServer {
        pub(crate) fn new(inner: Arc<InMemoryMockServer>, prefix: &[u8]) -> Arc<Self> {
            Arc::new(Self {
                inner,
                prefix: prefix.to_vec(),
            })
        }
    }

    #[async_trait]
    impl MockServer for HangingServer {
        async fn scan(&self) -> Result<Vec<MockDeviceInfo>, TransportError> {
            self.inner.scan().await
        }

        async fn connect(&self, device_id: &DeviceId) -> Result<String, TransportError> {
            self.inner.connect(device_id).await
        }

        async fn send(&self, session_id: &str, apdu: Bytes) -> Result<Bytes, TransportError> {
            if apdu.starts_with(&self.prefix) {
                futures::future::pending::<()>().await;
            }
            self.inner.send(session_id, apdu).await
        }

        async fn disconnect(&self, session_id: &str) -> Result<(), TransportError> {
            self.inner.disconnect(session_id).await
        }
    }

    pub(crate) async fn session_with(server: Arc<dyn MockServer>) -> DeviceSession {
        let device = MockTransport::new(server)
            .connect(&DeviceId::from("mock"), Arc::new(|_| {}))
            .await
            .unwrap();
        DeviceSession::new(
            device,
            KitConfig::default()
                .with_refresher_interval(std::time::Duration::from_millis(100))
                .with_unlock_timeout(std::time::Duration::from_secs(1)),
        )
    }

    pub(crate) async fn session(server: Arc<InMemoryMockServer>) -> DeviceSession {
        session_with(server).await
    }
}
