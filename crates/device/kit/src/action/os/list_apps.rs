use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{OsActionContext, go_to_dashboard::go_to_dashboard, run_command, unlock_timeout};
use crate::{
    action::{DeviceAction, DeviceActionError, UserInteractionRequired},
    commands::os::ListAppsCommand,
    session::InstalledApp,
};

/// List the installed apps from the dashboard
///
/// The user is asked to allow the listing on the device. The result is also
/// recorded on the session state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListApps {
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

#[async_trait]
impl DeviceAction for ListApps {
    type Output = Vec<InstalledApp>;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "ListApps"
    }

    async fn run(self, ctx: OsActionContext) -> Result<Vec<InstalledApp>, DeviceActionError> {
        go_to_dashboard(&ctx, unlock_timeout(&ctx, self.unlock_timeout)).await?;

        ctx.pending(UserInteractionRequired::AllowSecureConnection);
        let mut apps = run_command(&ctx, &ListAppsCommand::first()).await?;
        ctx.pending(UserInteractionRequired::None);

        if !apps.is_empty() {
            loop {
                let page = run_command(&ctx, &ListAppsCommand::next()).await?;
                if page.is_empty() {
                    break;
                }
                apps.extend(page);
            }
        }

        debug!(count = apps.len(), "Listed installed apps");
        ctx.api().set_installed_apps(apps.clone());
        Ok(apps)
    }
}
