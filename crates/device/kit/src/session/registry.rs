use std::collections::HashMap;

use nexum_device_transport::DeviceId;
use parking_lot::RwLock;
use tracing::{debug, warn};

use super::{DeviceSession, DeviceSessionId};
use crate::error::KitError;

/// Live sessions by id
#[derive(Debug, Default)]
pub struct DeviceSessionRegistry {
    sessions: RwLock<HashMap<DeviceSessionId, DeviceSession>>,
}

impl DeviceSessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session. Registering the same id twice keeps the first one.
    pub fn add(&self, session: DeviceSession) {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(&session.id()) {
            warn!(session = %session.id(), "Session already registered");
            return;
        }
        debug!(session = %session.id(), "Session registered");
        sessions.insert(session.id(), session);
    }

    /// Look up a session
    pub fn get(&self, id: &DeviceSessionId) -> Result<DeviceSession, KitError> {
        self.sessions
            .read()
            .get(id)
            .cloned()
            .ok_or(KitError::SessionNotFound(*id))
    }

    /// Session of a device, if it has one
    pub fn find_by_device(&self, device_id: &DeviceId) -> Option<DeviceSession> {
        self.sessions
            .read()
            .values()
            .find(|session| &session.device().id == device_id)
            .cloned()
    }

    /// Close a session, then forget it
    pub async fn remove(&self, id: &DeviceSessionId) -> Result<(), KitError> {
        let session = self.get(id)?;
        session.close().await;
        self.sessions.write().remove(id);
        debug!(session = %id, "Session removed");
        Ok(())
    }

    /// All live sessions
    pub fn list(&self) -> Vec<DeviceSession> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is live
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
