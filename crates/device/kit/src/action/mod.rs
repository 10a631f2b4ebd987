//! Device actions
//!
//! A device action is a multi-step procedure against the device (open an app,
//! list the installed apps, run a command inside an app) that may need the user
//! to do something on the device along the way. Running one yields a stream of
//! [`DeviceActionState`]s: any number of `Pending` states naming the interaction
//! the device waits for, then exactly one `Completed` or `Error`.

mod context;
mod engine;
mod error;
pub mod os;
pub mod task;

use std::fmt;

use async_trait::async_trait;
use derive_more::Display;
use serde::{Deserialize, Serialize};

pub use context::{ActionContext, InternalApi};
pub use engine::{
    CancelHandle, DeviceActionEngine, DeviceActionStream, ExecuteDeviceActionReturnType,
};
pub use error::DeviceActionError;
pub use task::{SendCommandInChunksTask, Task};

/// What the device waits for the user to do
#[derive(Debug, Display, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UserInteractionRequired {
    /// Nothing
    #[default]
    #[display("none")]
    None,
    /// Enter the PIN
    #[display("unlock-device")]
    UnlockDevice,
    /// Confirm opening an app
    #[display("confirm-open-app")]
    ConfirmOpenApp,
    /// Review and sign a transaction
    #[display("sign-transaction")]
    SignTransaction,
    /// Review and sign typed data
    #[display("sign-typed-data")]
    SignTypedData,
    /// Review and sign a message
    #[display("sign-personal-message")]
    SignPersonalMessage,
    /// Allow the secure connection with the device manager
    #[display("allow-secure-connection")]
    AllowSecureConnection,
    /// Check an address on screen
    #[display("verify-address")]
    VerifyAddress,
}

/// One step of a device action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceActionState<O, I> {
    /// Still running
    Pending(I),
    /// Finished with an output
    Completed(O),
    /// Failed
    Error(DeviceActionError),
}

impl<O, I> DeviceActionState<O, I> {
    /// Whether no state follows this one
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending(_))
    }
}

/// A multi-step procedure run by the [`DeviceActionEngine`]
///
/// `run` talks to the device through the context's [`InternalApi`], which
/// bypasses the session queue: the engine holds the queue for the whole run.
#[async_trait]
pub trait DeviceAction: Send + 'static {
    /// Value of the `Completed` state
    type Output: fmt::Debug + Send + 'static;

    /// Value of the `Pending` states
    type Intermediate: fmt::Debug + Clone + Send + 'static;

    /// Name used in logs
    fn name(&self) -> &'static str;

    /// Run the action to completion
    async fn run(
        self,
        ctx: ActionContext<Self::Intermediate>,
    ) -> Result<Self::Output, DeviceActionError>;
}
