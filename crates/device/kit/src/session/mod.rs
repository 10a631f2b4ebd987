//! Device sessions
//!
//! A [`DeviceSession`] owns one connected device. Every exchange goes through
//! the session's [`IntentQueue`], and the outcome of each exchange is folded
//! into the published [`DeviceSessionState`]:
//!
//! - `Busy` while an APDU is in flight
//! - `Locked` after a `55 15` answer, `Connected` after any other answer
//! - `NotConnected` once the connection is terminated or the session closed

mod id;
mod queue;
mod refresher;
mod registry;
mod state;

use std::{
    any::Any,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use bytes::Bytes;
use nexum_apdu_core::{ApduResponse, Command, CommandError, CommandResult, DeviceModelId};
use nexum_device_transport::ConnectedDevice;
use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{Level, debug, info, instrument, trace, warn};

pub use id::DeviceSessionId;
pub use queue::{IntentGuard, IntentQueue, IntentType};
pub use refresher::DeviceSessionRefresher;
pub use registry::DeviceSessionRegistry;
pub use state::{
    AppInfo, DeviceSessionState, DeviceSessionStateType, DeviceStatus, FirmwareVersion,
    InstalledApp,
};

use crate::{
    action::{DeviceAction, DeviceActionEngine, ExecuteDeviceActionReturnType},
    commands::os::{AppAndVersion, GetAppAndVersion, OsVersion},
    config::KitConfig,
    error::KitError,
    refresher::{RefresherBlocker, RefresherControl, RefresherError, RefresherService},
};

/// Options of a single APDU exchange
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendApduOptions {
    /// Wait for the device to re-enumerate after a successful answer
    pub triggers_disconnection: bool,
    /// Bound on the exchange, the kit default when unset
    pub timeout: Option<Duration>,
}

impl SendApduOptions {
    /// Set the disconnection flag
    pub const fn with_triggers_disconnection(mut self, triggers_disconnection: bool) -> Self {
        self.triggers_disconnection = triggers_disconnection;
        self
    }

    /// Set the exchange timeout
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug)]
pub(crate) struct SessionInner {
    id: DeviceSessionId,
    device: ConnectedDevice,
    config: KitConfig,
    state_tx: Mutex<Option<watch::Sender<DeviceSessionState>>>,
    state_rx: watch::Receiver<DeviceSessionState>,
    queue: IntentQueue,
    refresher: Arc<DeviceSessionRefresher>,
    refresher_service: Arc<RefresherService>,
    closed: AtomicBool,
}

/// Session with one connected device
///
/// Cheap to clone; all clones share the same queue and state.
#[derive(Debug, Clone)]
pub struct DeviceSession {
    inner: Arc<SessionInner>,
}

/// A command bound to a session, parsed for an explicit device model
#[derive(Debug)]
pub struct BoundCommand<'a, C> {
    session: &'a DeviceSession,
    command: &'a C,
}

impl<C: Command> BoundCommand<'_, C> {
    /// Queue the command and parse the answer for `device_model`
    pub async fn run(
        self,
        device_model: DeviceModelId,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        let _intent = self.session.inner.queue.enqueue(IntentType::SendCommand).await;
        self.session.exchange_command(self.command, device_model).await
    }
}

/// Marks the session busy for the duration of one exchange
struct ExchangeStatus<'a> {
    session: &'a DeviceSession,
    previous: DeviceStatus,
    finished: bool,
}

impl<'a> ExchangeStatus<'a> {
    fn begin(session: &'a DeviceSession) -> Self {
        let previous = session.state().device_status;
        session.update_state(|state| state.device_status = DeviceStatus::Busy);
        Self {
            session,
            previous,
            finished: false,
        }
    }

    fn finish(mut self, status: DeviceStatus) {
        self.finished = true;
        self.session
            .update_state(|state| state.device_status = status);
    }
}

impl Drop for ExchangeStatus<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let previous = self.previous;
            self.session.update_state(|state| {
                if state.device_status == DeviceStatus::Busy {
                    state.device_status = previous;
                }
            });
        }
    }
}

impl DeviceSession {
    /// Open a session over a connected device and start its refresher
    pub fn new(device: ConnectedDevice, config: KitConfig) -> Self {
        let (state_tx, state_rx) =
            watch::channel(DeviceSessionState::connected(device.device_model.id));
        let inner = Arc::new_cyclic(|weak| {
            let refresher = Arc::new(DeviceSessionRefresher::new(
                weak.clone(),
                config.refresher.interval,
                config.refresher.enabled,
            ));
            SessionInner {
                id: DeviceSessionId::new(),
                device,
                config,
                state_tx: Mutex::new(Some(state_tx)),
                state_rx,
                queue: IntentQueue::new(),
                refresher_service: RefresherService::new(refresher.clone()),
                refresher,
                closed: AtomicBool::new(false),
            }
        });
        let session = Self { inner };
        if let Err(e) = session.inner.refresher.start() {
            warn!(error = %e, "Refresher did not start");
        }
        info!(
            session = %session.id(),
            device = %session.inner.device.id,
            model = %session.device_model_id(),
            "Device session opened"
        );
        session
    }

    /// Session id
    pub fn id(&self) -> DeviceSessionId {
        self.inner.id
    }

    /// The connected device
    pub fn device(&self) -> &ConnectedDevice {
        &self.inner.device
    }

    /// Model of the connected device
    pub fn device_model_id(&self) -> DeviceModelId {
        self.inner.device.device_model.id
    }

    /// Configuration the session was opened with
    pub fn config(&self) -> &KitConfig {
        &self.inner.config
    }

    /// Current state snapshot
    pub fn state(&self) -> DeviceSessionState {
        self.inner.state_rx.borrow().clone()
    }

    /// Subscribe to state changes.
    ///
    /// The channel closes after the final `NotConnected` state once the session is closed.
    pub fn subscribe_state(&self) -> watch::Receiver<DeviceSessionState> {
        self.inner.state_rx.clone()
    }

    /// Whether the session was closed
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Queue a raw APDU
    #[instrument(level = "debug", skip_all, fields(session = %self.id()))]
    pub async fn send_apdu(
        &self,
        apdu: Bytes,
        options: SendApduOptions,
    ) -> Result<ApduResponse, KitError> {
        let _intent = self.inner.queue.enqueue(IntentType::SendApdu).await;
        self.send_apdu_unqueued(apdu, options).await
    }

    /// Queue a typed command.
    ///
    /// Transport failures are errors; anything the device answers is in the
    /// returned [`CommandResult`].
    #[instrument(level = "debug", skip_all, fields(session = %self.id(), command = command.name()))]
    pub async fn send_command<C: Command>(
        &self,
        command: &C,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        let _intent = self.inner.queue.enqueue(IntentType::SendCommand).await;
        self.send_command_unqueued(command).await
    }

    /// Bind a command to this session, to be parsed for a model chosen later
    pub const fn get_command<'a, C: Command>(&'a self, command: &'a C) -> BoundCommand<'a, C> {
        BoundCommand {
            session: self,
            command,
        }
    }

    /// Run a device action on this session
    pub fn execute_device_action<A: DeviceAction>(
        &self,
        action: A,
    ) -> ExecuteDeviceActionReturnType<A::Output, A::Intermediate> {
        DeviceActionEngine::execute(self, action)
    }

    /// Pause the refresher until the blocker is released
    pub fn disable_refresher(&self, reason: &str) -> Result<RefresherBlocker, RefresherError> {
        self.inner.refresher_service.disable_refresher(reason)
    }

    /// Switch background polling on or off, regardless of blockers
    pub fn toggle_refresher(&self, enabled: bool) {
        self.inner.refresher.toggle(enabled);
    }

    /// Whether background polling is currently active
    pub fn is_refresher_running(&self) -> bool {
        self.inner.refresher.is_running()
    }

    /// Number of live refresher blockers
    pub fn refresher_blocker_count(&self) -> usize {
        self.inner.refresher_service.blocker_count()
    }

    /// Close the session: stop polling, publish `NotConnected`, complete the
    /// state channel and disconnect the device. Idempotent.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.refresher.shutdown();
        self.update_state(|state| state.device_status = DeviceStatus::NotConnected);
        self.inner.state_tx.lock().take();
        if let Err(e) = self.inner.device.connection.disconnect().await {
            debug!(session = %self.id(), error = %e, "Disconnect on close failed");
        }
        info!(session = %self.id(), "Device session closed");
    }

    pub(crate) fn queue(&self) -> &IntentQueue {
        &self.inner.queue
    }

    pub(crate) async fn send_apdu_unqueued(
        &self,
        apdu: Bytes,
        options: SendApduOptions,
    ) -> Result<ApduResponse, KitError> {
        if self.is_closed() {
            return Err(KitError::SessionClosed(self.id()));
        }
        let timeout = options.timeout.or(self.inner.config.apdu_timeout);

        let status = ExchangeStatus::begin(self);
        let result = self
            .inner
            .device
            .connection
            .send_apdu(apdu, options.triggers_disconnection, timeout)
            .await;
        let next = match &result {
            Ok(response) if response.status().is_device_locked() => DeviceStatus::Locked,
            Ok(_) => DeviceStatus::Connected,
            Err(e) if e.is_terminal() => DeviceStatus::NotConnected,
            Err(_) => status.previous,
        };
        status.finish(next);

        Ok(result?)
    }

    pub(crate) async fn send_command_unqueued<C: Command>(
        &self,
        command: &C,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        self.exchange_command(command, self.device_model_id()).await
    }

    async fn exchange_command<C: Command>(
        &self,
        command: &C,
        device_model: DeviceModelId,
    ) -> Result<CommandResult<C::Output, C::Error>, KitError> {
        let apdu = match command.apdu() {
            Ok(apdu) => apdu,
            Err(e) => return Ok(Err(CommandError::InvalidCommand(e))),
        };
        let options = SendApduOptions::default()
            .with_triggers_disconnection(command.triggers_disconnection());
        let response = self.send_apdu_unqueued(apdu.to_bytes(), options).await?;

        let status = response.status();
        match status.tracing_level() {
            Level::DEBUG => debug!(command = command.name(), status = %status, "Command answered"),
            Level::INFO => info!(
                command = command.name(),
                status = %status,
                reason = status.description(),
                "Command answered"
            ),
            _ => warn!(
                command = command.name(),
                status = %status,
                reason = status.description(),
                "Command answered"
            ),
        }

        let result = command.parse_response(&response, device_model);
        if let Ok(output) = &result {
            self.observe_output(output);
        }
        Ok(result)
    }

    /// Fold well-known command outputs into the session state
    fn observe_output(&self, output: &dyn Any) {
        if let Some(app) = output.downcast_ref::<AppAndVersion>() {
            self.update_state(|state| {
                state.current_app = Some(AppInfo {
                    name: app.name.clone(),
                    version: app.version.clone(),
                });
                if state.session_state_type == DeviceSessionStateType::Connected {
                    state.session_state_type = DeviceSessionStateType::ReadyWithoutSecureChannel;
                }
            });
        } else if let Some(os) = output.downcast_ref::<OsVersion>() {
            self.update_state(|state| state.firmware_version = Some(os.firmware_version()));
        }
    }

    /// Apply a change to the state, notifying subscribers when it changed anything
    pub(crate) fn update_state(&self, f: impl FnOnce(&mut DeviceSessionState)) {
        let guard = self.inner.state_tx.lock();
        let Some(tx) = guard.as_ref() else {
            return;
        };
        tx.send_if_modified(|state| {
            let before = state.clone();
            f(state);
            *state != before
        });
    }

    /// One refresher poll, skipped when anything else is using the device
    async fn refresh(&self) {
        if self.inner.device.connection.is_busy() {
            return;
        }
        let Some(_intent) = self.inner.queue.try_enqueue(IntentType::Refresh) else {
            trace!(session = %self.id(), "Queue busy, skipping poll");
            return;
        };
        match self.send_command_unqueued(&GetAppAndVersion).await {
            Ok(Ok(app)) => trace!(session = %self.id(), app = %app.name, "Polled device"),
            Ok(Err(e)) => trace!(session = %self.id(), error = %e, "Poll rejected by device"),
            Err(e) => debug!(session = %self.id(), error = %e, "Poll failed"),
        }
    }
}
