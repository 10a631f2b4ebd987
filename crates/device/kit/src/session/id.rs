use derive_more::Display;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique id of a device session
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[display("{_0}")]
pub struct DeviceSessionId(Uuid);

impl DeviceSessionId {
    /// Generate a fresh id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Underlying UUID
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for DeviceSessionId {
    fn default() -> Self {
        Self::new()
    }
}
