//! Session state published to subscribers

use derive_more::Display;
use nexum_apdu_core::DeviceModelId;
use serde::{Deserialize, Serialize};

/// Availability of the device
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    /// Connected and idle
    #[display("CONNECTED")]
    Connected,
    /// An exchange is in flight
    #[display("BUSY")]
    Busy,
    /// Connected but locked by the user
    #[display("LOCKED")]
    Locked,
    /// The connection is gone
    #[display("NOT_CONNECTED")]
    NotConnected,
}

/// How far the session got in its setup
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceSessionStateType {
    /// Connected, nothing known about the device yet
    #[display("CONNECTED")]
    Connected,
    /// The running app is known
    #[display("READY_WITHOUT_SECURE_CHANNEL")]
    ReadyWithoutSecureChannel,
}

/// App running on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppInfo {
    /// App name, `BOLOS` for the dashboard
    pub name: String,
    /// App version
    pub version: String,
}

impl AppInfo {
    /// Name reported when no app is open
    pub const DASHBOARD: &'static str = "BOLOS";

    /// Whether this is the dashboard rather than an app
    pub fn is_dashboard(&self) -> bool {
        self.name == Self::DASHBOARD
    }
}

/// App installed on the device
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledApp {
    /// App name
    pub name: String,
    /// App flags
    pub flags: u16,
    /// Hash of the app code, hex encoded
    pub hash_code_data: String,
    /// Hash of the app, hex encoded
    pub hash: String,
    /// Flash blocks used by the app
    pub blocks: u16,
}

/// Firmware versions
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FirmwareVersion {
    /// Secure element OS version
    pub os: String,
    /// MCU version
    pub mcu: String,
    /// MCU bootloader version
    pub bootloader: Option<String>,
}

/// Snapshot of a device session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSessionState {
    /// Setup stage
    pub session_state_type: DeviceSessionStateType,
    /// Availability
    pub device_status: DeviceStatus,
    /// Connected model
    pub device_model_id: DeviceModelId,
    /// Running app, once known
    pub current_app: Option<AppInfo>,
    /// Installed apps, once listed
    pub installed_apps: Vec<InstalledApp>,
    /// Firmware versions, once queried
    pub firmware_version: Option<FirmwareVersion>,
}

impl DeviceSessionState {
    /// Initial state of a freshly connected session
    pub const fn connected(device_model_id: DeviceModelId) -> Self {
        Self {
            session_state_type: DeviceSessionStateType::Connected,
            device_status: DeviceStatus::Connected,
            device_model_id,
            current_app: None,
            installed_apps: Vec::new(),
            firmware_version: None,
        }
    }
}
