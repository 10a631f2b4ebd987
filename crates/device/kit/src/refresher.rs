//! Pausing the session refresher
//!
//! Anything that needs the device to itself (a device action, a long command)
//! takes a [`RefresherBlocker`]. The refresher is stopped when the first blocker
//! is taken and started again when the last one is released. Start and stop are
//! only ever issued on those transitions.

use std::{
    collections::HashSet,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

/// Refresher state transition failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RefresherError {
    /// Start requested while already running
    #[error("Refresher is already running")]
    AlreadyRunning,

    /// Stop requested while not running
    #[error("Refresher is not running")]
    NotRunning,
}

/// Something that can be started and stopped by a [`RefresherService`]
pub trait RefresherControl: Send + Sync + fmt::Debug {
    /// Resume polling
    fn start(&self) -> Result<(), RefresherError>;

    /// Pause polling
    fn stop(&self) -> Result<(), RefresherError>;
}

/// Reference-counted pause of one refresher
#[derive(Debug)]
pub struct RefresherService {
    refresher: Arc<dyn RefresherControl>,
    blockers: Mutex<HashSet<Uuid>>,
}

impl RefresherService {
    /// Manage the given refresher
    pub fn new(refresher: Arc<dyn RefresherControl>) -> Arc<Self> {
        Arc::new(Self {
            refresher,
            blockers: Mutex::new(HashSet::new()),
        })
    }

    /// Pause the refresher until the returned blocker is released or dropped.
    ///
    /// Fails, without registering the blocker, when the refresher refuses to stop.
    pub fn disable_refresher(
        self: &Arc<Self>,
        reason: &str,
    ) -> Result<RefresherBlocker, RefresherError> {
        let mut blockers = self.blockers.lock();
        let id = loop {
            let id = Uuid::new_v4();
            if !blockers.contains(&id) {
                break id;
            }
        };
        blockers.insert(id);
        if blockers.len() == 1 {
            if let Err(e) = self.refresher.stop() {
                blockers.remove(&id);
                return Err(e);
            }
        }
        debug!(blocker = %id, reason, active = blockers.len(), "Refresher blocked");

        Ok(RefresherBlocker {
            id,
            service: Arc::clone(self),
            released: AtomicBool::new(false),
        })
    }

    /// Number of live blockers
    pub fn blocker_count(&self) -> usize {
        self.blockers.lock().len()
    }

    /// Whether any blocker is live
    pub fn is_blocked(&self) -> bool {
        !self.blockers.lock().is_empty()
    }

    fn release(&self, id: Uuid) -> Result<(), RefresherError> {
        let mut blockers = self.blockers.lock();
        if !blockers.remove(&id) {
            return Ok(());
        }
        debug!(blocker = %id, active = blockers.len(), "Refresher blocker released");
        if blockers.is_empty() {
            self.refresher.start()?;
        }
        Ok(())
    }
}

/// Handle keeping the refresher paused
///
/// Releasing is idempotent; dropping an unreleased blocker releases it.
#[derive(Debug)]
pub struct RefresherBlocker {
    id: Uuid,
    service: Arc<RefresherService>,
    released: AtomicBool,
}

impl RefresherBlocker {
    /// Unique id of this blocker
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Release the blocker, restarting the refresher if it was the last one
    pub fn release(&self) -> Result<(), RefresherError> {
        if self.released.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.service.release(self.id)
    }
}

impl Drop for RefresherBlocker {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            error!(blocker = %self.id, error = %e, "Failed to restart refresher");
        }
    }
}
