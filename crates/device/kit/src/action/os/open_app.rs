use std::time::Duration;

use async_trait::async_trait;
use nexum_apdu_core::CommandError;
use tracing::{debug, info};

use super::{OsActionContext, get_device_status::device_status, run_command, unlock_timeout};
use crate::{
    action::{DeviceAction, DeviceActionError, UserInteractionRequired},
    commands::os::{CloseApp, OpenAppCommand, OpenAppError},
    session::AppInfo,
};

/// Make sure the named app is running
///
/// Another running app is closed first; opening from the dashboard asks the
/// user to confirm on the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenApp {
    /// App to open
    pub app_name: String,
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

impl OpenApp {
    /// Open the named app
    pub fn new(app_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            unlock_timeout: None,
        }
    }
}

#[async_trait]
impl DeviceAction for OpenApp {
    type Output = ();
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "OpenApp"
    }

    async fn run(self, ctx: OsActionContext) -> Result<(), DeviceActionError> {
        let timeout = unlock_timeout(&ctx, self.unlock_timeout);
        open_app(&ctx, &self.app_name, timeout).await
    }
}

pub(super) async fn open_app(
    ctx: &OsActionContext,
    app_name: &str,
    unlock_timeout: Duration,
) -> Result<(), DeviceActionError> {
    let status = device_status(ctx, unlock_timeout).await?;
    if status.current_app == app_name {
        debug!(app = app_name, "App already open");
        return Ok(());
    }

    if status.current_app != AppInfo::DASHBOARD {
        info!(current = %status.current_app, requested = app_name, "Closing running app");
        run_command(ctx, &CloseApp).await?;
    }

    ctx.pending(UserInteractionRequired::ConfirmOpenApp);
    match ctx.api().send_command(&OpenAppCommand::new(app_name)).await? {
        Ok(()) => {
            ctx.pending(UserInteractionRequired::None);
            Ok(())
        }
        Err(CommandError::Command(OpenAppError::UnknownApp)) => {
            Err(DeviceActionError::UnknownApp(app_name.to_string()))
        }
        Err(e) => Err(DeviceActionError::from_command("OpenApp", e)),
    }
}
