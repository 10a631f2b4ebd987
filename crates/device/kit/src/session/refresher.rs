//! Background polling of the device state
//!
//! While running, the refresher asks the device for its current app every
//! interval. The answer (or the locked status word) flows into the session
//! state. Polls are skipped while the device is busy or another intent holds
//! the queue, and the loop ends once the device is gone.
//!
//! Stopping signals the poll task instead of aborting it: a poll already on
//! the link completes, and the task exits before its next tick.

use std::{sync::Weak, time::Duration};

use parking_lot::Mutex;
use tokio::{
    sync::oneshot,
    task::JoinHandle,
    time::{Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

use super::{DeviceSession, SessionInner, state::DeviceStatus};
use crate::refresher::{RefresherControl, RefresherError};

#[derive(Debug)]
struct RefresherState {
    /// Logically started, i.e. not paused by a blocker
    active: bool,
    /// Administrative switch
    enabled: bool,
    closed: bool,
    task: Option<PollTask>,
}

#[derive(Debug)]
struct PollTask {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

impl PollTask {
    fn is_alive(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Let the task exit before its next poll
    fn stop(self) {
        let _ = self.stop.send(());
    }
}

/// State poller of one session
#[derive(Debug)]
pub struct DeviceSessionRefresher {
    session: Weak<SessionInner>,
    interval: Duration,
    state: Mutex<RefresherState>,
}

impl DeviceSessionRefresher {
    pub(super) fn new(session: Weak<SessionInner>, interval: Duration, enabled: bool) -> Self {
        Self {
            session,
            interval,
            state: Mutex::new(RefresherState {
                active: false,
                enabled,
                closed: false,
                task: None,
            }),
        }
    }

    /// Whether a polling task is alive
    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .task
            .as_ref()
            .is_some_and(PollTask::is_alive)
    }

    /// Administrative override, independent of blockers
    pub fn toggle(&self, enabled: bool) {
        let mut state = self.state.lock();
        state.enabled = enabled;
        if enabled {
            self.spawn_if_needed(&mut state);
        } else if let Some(task) = state.task.take() {
            task.stop();
        }
        info!(enabled, "Refresher toggled");
    }

    /// Stop for good; later start and stop requests are ignored
    pub(super) fn shutdown(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.active = false;
        if let Some(task) = state.task.take() {
            task.stop();
        }
    }

    fn spawn_if_needed(&self, state: &mut RefresherState) {
        if !state.active || !state.enabled || state.closed {
            return;
        }
        if state.task.as_ref().is_some_and(PollTask::is_alive) {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime, refresher not started");
            return;
        };
        let (stop, stopped) = oneshot::channel();
        let handle = runtime.spawn(poll_loop(self.session.clone(), self.interval, stopped));
        state.task = Some(PollTask { handle, stop });
    }
}

impl RefresherControl for DeviceSessionRefresher {
    fn start(&self) -> Result<(), RefresherError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if state.active {
            return Err(RefresherError::AlreadyRunning);
        }
        state.active = true;
        self.spawn_if_needed(&mut state);
        debug!("Refresher started");
        Ok(())
    }

    fn stop(&self) -> Result<(), RefresherError> {
        let mut state = self.state.lock();
        if state.closed {
            return Ok(());
        }
        if !state.active {
            return Err(RefresherError::NotRunning);
        }
        state.active = false;
        if let Some(task) = state.task.take() {
            task.stop();
        }
        debug!("Refresher stopped");
        Ok(())
    }
}

async fn poll_loop(
    session: Weak<SessionInner>,
    interval: Duration,
    mut stopped: oneshot::Receiver<()>,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            biased;
            _ = &mut stopped => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = session.upgrade() else {
            break;
        };
        let session = DeviceSession { inner };
        match session.state().device_status {
            DeviceStatus::NotConnected => {
                debug!(session = %session.id(), "Device not connected, refresher exiting");
                break;
            }
            DeviceStatus::Busy => continue,
            DeviceStatus::Connected | DeviceStatus::Locked => session.refresh().await,
        }
    }
}
