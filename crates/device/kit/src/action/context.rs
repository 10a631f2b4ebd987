use std::{fmt, sync::Arc};

use bytes::Bytes;
use nexum_apdu_core::{ApduResponse, Command, CommandResult, DeviceModelId};

use crate::{
    config::KitConfig,
    session::{DeviceSession, DeviceSessionState, InstalledApp, SendApduOptions},
};

use super::error::DeviceActionError;

/// Device access for running actions
///
/// Exchanges go straight to the connection; the caller already owns the
/// session queue.
#[derive(Debug, Clone)]
pub struct InternalApi {
    session: DeviceSession,
}

impl InternalApi {
    pub(crate) const fn new(session: DeviceSession) -> Self {
        Self { session }
    }

    /// Send a typed command
    pub async fn send_command<C: Command>(
        &self,
        command: &C,
    ) -> Result<CommandResult<C::Output, C::Error>, DeviceActionError> {
        Ok(self.session.send_command_unqueued(command).await?)
    }

    /// Send a raw APDU
    pub async fn send_apdu(
        &self,
        apdu: Bytes,
        options: SendApduOptions,
    ) -> Result<ApduResponse, DeviceActionError> {
        Ok(self.session.send_apdu_unqueued(apdu, options).await?)
    }

    /// Current session state
    pub fn session_state(&self) -> DeviceSessionState {
        self.session.state()
    }

    /// Model of the connected device
    pub fn device_model_id(&self) -> DeviceModelId {
        self.session.device_model_id()
    }

    /// Session configuration
    pub fn config(&self) -> &KitConfig {
        self.session.config()
    }

    /// Record the installed apps on the session state
    pub fn set_installed_apps(&self, apps: Vec<InstalledApp>) {
        self.session
            .update_state(|state| state.installed_apps = apps);
    }
}

pub(crate) trait PendingSink<I>: Send + Sync {
    fn pending(&self, value: I) -> bool;
}

/// What a running action gets from the engine
pub struct ActionContext<I> {
    api: InternalApi,
    sink: Arc<dyn PendingSink<I>>,
}

impl<I> fmt::Debug for ActionContext<I> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionContext")
            .field("api", &self.api)
            .finish_non_exhaustive()
    }
}

impl<I> ActionContext<I> {
    pub(crate) fn new(api: InternalApi, sink: Arc<dyn PendingSink<I>>) -> Self {
        Self { api, sink }
    }

    /// Device access
    pub const fn api(&self) -> &InternalApi {
        &self.api
    }

    /// Publish a `Pending` state. Returns `false` once the action can no longer
    /// publish, i.e. after cancellation.
    pub fn pending(&self, value: I) -> bool {
        self.sink.pending(value)
    }
}
