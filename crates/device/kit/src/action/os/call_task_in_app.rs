use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::{OsActionContext, open_app::open_app, unlock_timeout};
use crate::action::{DeviceAction, DeviceActionError, UserInteractionRequired, task::Task};

/// Open an app, then run a [`Task`] in it
#[derive(Debug, Clone)]
pub struct CallTaskInApp<T> {
    /// Task to run
    pub task: T,
    /// App the task is meant for
    pub app_name: String,
    /// What the user has to do while the task runs
    pub required_user_interaction: UserInteractionRequired,
    /// Override of the configured unlock timeout
    pub unlock_timeout: Option<Duration>,
}

impl<T> CallTaskInApp<T> {
    /// Run `task` inside `app_name`
    pub fn new(
        task: T,
        app_name: impl Into<String>,
        required_user_interaction: UserInteractionRequired,
    ) -> Self {
        Self {
            task,
            app_name: app_name.into(),
            required_user_interaction,
            unlock_timeout: None,
        }
    }
}

#[async_trait]
impl<T: Task> DeviceAction for CallTaskInApp<T> {
    type Output = T::Output;
    type Intermediate = UserInteractionRequired;

    fn name(&self) -> &'static str {
        "CallTaskInApp"
    }

    async fn run(self, ctx: OsActionContext) -> Result<T::Output, DeviceActionError> {
        open_app(&ctx, &self.app_name, unlock_timeout(&ctx, self.unlock_timeout)).await?;

        ctx.pending(self.required_user_interaction);
        debug!(task = self.task.name(), app = %self.app_name, "Running task");
        let output = self
            .task
            .run(ctx.api())
            .await?
            .map_err(|e| DeviceActionError::from_command(self.task.name(), e))?;
        ctx.pending(UserInteractionRequired::None);
        Ok(output)
    }
}
