use std::time::Duration;

use async_trait::async_trait;
use nexum_apdu_core::Command;

use super::{OsActionContext, open_app::open_app, run_command, unlock_timeout};
use crate::action::{DeviceAction, DeviceActionError, UserInteractionRequired};

/// Open an app, then send it one command
///
/// `required_user_interaction` is published while the command waits for the
/// device, e.g. [`UserInteractionRequired::SignTransaction`].
#[derive(Debug, Clone)]
pub struct SendCommandInApp<C> {
    /// Command to send
    pub command: C,
    /// App the command is meant for
    pub app_name: String,
    /// What the user has to do while the command runs
    pub required_user_interaction: UserInteractionRequired,
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

impl<C> SendCommandInApp<C> {
    /// Send `command` inside `app_name`
    pub fn new(
        command: C,
        app_name: impl Into<String>,
        required_user_interaction: UserInteractionRequired,
    ) -> Self {
        Self {
            command,
            app_name: app_name.into(),
            required_user_interaction,
            unlock_timeout: None,
        }
    }
}

#[async_trait]
impl<C> DeviceAction for SendCommandInApp<C>
where
    C: Command + 'static,
{
    type Output = C::Output;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "SendCommandInApp"
    }

    async fn run(self, ctx: OsActionContext) -> Result<C::Output, DeviceActionError> {
        open_app(&ctx, &self.app_name, unlock_timeout(&ctx, self.unlock_timeout)).await?;

        ctx.pending(self.required_user_interaction);
        let output = run_command(&ctx, &self.command).await?;
        ctx.pending(UserInteractionRequired::None);
        Ok(output)
    }
}
