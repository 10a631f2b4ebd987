use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{OsActionContext, unlock_timeout};
use crate::{
    action::{DeviceAction, DeviceActionError, UserInteractionRequired},
    commands::os::{AppAndVersion, GetAppAndVersion},
    session::DeviceStatus,
};

/// Check the device is reachable and unlocked, and report the running app
///
/// A locked device gets the unlock timeout to be unlocked by the user.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetDeviceStatus {
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

/// Output of [`GetDeviceStatus`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceStatusOutput {
    /// Running app
    pub current_app: String,
    /// Its version
    pub current_app_version: String,
}

impl From<AppAndVersion> for DeviceStatusOutput {
    fn from(app: AppAndVersion) -> Self {
        Self {
            current_app: app.name,
            current_app_version: app.version,
        }
    }
}

#[async_trait]
impl DeviceAction for GetDeviceStatus {
    type Output = DeviceStatusOutput;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "GetDeviceStatus"
    }

    async fn run(self, ctx: OsActionContext) -> Result<DeviceStatusOutput, DeviceActionError> {
        device_status(&ctx, unlock_timeout(&ctx, self.unlock_timeout)).await
    }
}

pub(super) async fn device_status(
    ctx: &OsActionContext,
    unlock_timeout: Duration,
) -> Result<DeviceStatusOutput, DeviceActionError> {
    ctx.pending(UserInteractionRequired::None);
    if ctx.api().session_state().device_status == DeviceStatus::NotConnected {
        return Err(DeviceActionError::SessionClosed);
    }

    match ctx.api().send_command(&GetAppAndVersion).await? {
        Ok(app) => return Ok(app.into()),
        Err(e) if e.is_device_locked() => {}
        Err(e) => return Err(DeviceActionError::from_command("GetAppAndVersion", e)),
    }

    debug!(timeout = ?unlock_timeout, "Device locked, waiting for unlock");
    ctx.pending(UserInteractionRequired::UnlockDevice);
    wait_for_unlock(ctx, unlock_timeout).await?;
    ctx.pending(UserInteractionRequired::None);

    match ctx.api().send_command(&GetAppAndVersion).await? {
        Ok(app) => Ok(app.into()),
        Err(e) => Err(DeviceActionError::from_command("GetAppAndVersion", e)),
    }
}

/// Poll until the session reports the device connected and unlocked
async fn wait_for_unlock(ctx: &OsActionContext, timeout: Duration) -> Result<(), DeviceActionError> {
    tokio::time::timeout(timeout, poll_until_unlocked(ctx))
        .await
        .unwrap_or(Err(DeviceActionError::DeviceLocked))
}

async fn poll_until_unlocked(ctx: &OsActionContext) -> Result<(), DeviceActionError> {
    let interval = ctx.api().config().refresher.interval;
    loop {
        tokio::time::sleep(interval).await;
        if ctx.api().session_state().device_status == DeviceStatus::Connected {
            return Ok(());
        }
        match ctx.api().send_command(&GetAppAndVersion).await? {
            Ok(_) => return Ok(()),
            Err(e) if e.is_device_locked() => {}
            Err(e) => return Err(DeviceActionError::from_command("GetAppAndVersion", e)),
        }
    }
}
