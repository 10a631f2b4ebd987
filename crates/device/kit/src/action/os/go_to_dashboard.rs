use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{OsActionContext, get_device_status::device_status, run_command, unlock_timeout};
use crate::{
    action::{DeviceAction, DeviceActionError, UserInteractionRequired},
    commands::os::{CloseApp, GetAppAndVersion},
    session::AppInfo,
};

/// Close the running app, if any, so the device shows its dashboard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoToDashboard {
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

#[async_trait]
impl DeviceAction for GoToDashboard {
    type Output = ();
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "GoToDashboard"
    }

    async fn run(self, ctx: OsActionContext) -> Result<(), DeviceActionError> {
        let timeout = unlock_timeout(&ctx, self.unlock_timeout);
        go_to_dashboard(&ctx, timeout).await
    }
}

pub(super) async fn go_to_dashboard(
    ctx: &OsActionContext,
    unlock_timeout: Duration,
) -> Result<(), DeviceActionError> {
    let status = device_status(ctx, unlock_timeout).await?;
    if status.current_app == AppInfo::DASHBOARD {
        debug!("Already on the dashboard");
        return Ok(());
    }

    info!(current = %status.current_app, "Closing running app");
    run_command(ctx, &CloseApp).await?;

    let app = run_command(ctx, &GetAppAndVersion).await?;
    if app.name != AppInfo::DASHBOARD {
        return Err(DeviceActionError::WrongApp {
            expected: AppInfo::DASHBOARD.to_string(),
            actual: app.name,
        });
    }
    Ok(())
}
