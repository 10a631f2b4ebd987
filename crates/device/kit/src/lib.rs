//! Device management for hardware wallets
//!
//! The kit sits on top of the device transports and provides:
//!
//! - [`DeviceSession`]s with a FIFO intent queue, a published
//!   [`DeviceSessionState`] and a background state refresher
//! - The [`CommandExecutor`] for typed [`Command`](nexum_apdu_core::Command)s and bulk APDU runs
//! - The [`DeviceActionEngine`] running multi-step device actions as cancellable
//!   state streams
//! - The OS commands and device actions (open app, list apps, ...) built on them
//! - [`DeviceManagementKit`], the composition root tying transports and sessions together
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

pub mod action;
pub mod commands;
pub mod config;
pub mod error;
pub mod executor;
pub mod kit;
pub mod refresher;
pub mod session;

pub use action::{
    ActionContext, CancelHandle, DeviceAction, DeviceActionEngine, DeviceActionError,
    DeviceActionState, DeviceActionStream, ExecuteDeviceActionReturnType, InternalApi,
    SendCommandInChunksTask, Task, UserInteractionRequired,
};
pub use config::{KitConfig, RefresherConfig};
pub use error::KitError;
pub use executor::{BulkApduError, BulkApduEvent, CommandExecutor};
pub use kit::{DeviceManagementKit, DeviceManagementKitBuilder};
pub use refresher::{RefresherBlocker, RefresherControl, RefresherError, RefresherService};
pub use session::{
    AppInfo, DeviceSession, DeviceSessionId, DeviceSessionRegistry, DeviceSessionState,
    DeviceSessionStateType, DeviceStatus, FirmwareVersion, InstalledApp, IntentQueue, IntentType,
    SendApduOptions,
};

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::action::os::{
        CallTaskInApp, GetDeviceStatus, GoToDashboard, ListApps, OpenApp, SendCommandInApp,
    };
    pub use crate::commands::os::{
        CloseApp, GetAppAndVersion, GetOsVersion, ListAppsCommand, OpenAppCommand,
    };
    pub use crate::{
        DeviceAction, DeviceActionError, DeviceActionState, DeviceManagementKit,
        DeviceSessionId, DeviceSessionState, DeviceStatus, KitConfig, KitError, Task,
        UserInteractionRequired,
    };
    pub use nexum_apdu_core::prelude::*;
    pub use nexum_device_transport::prelude::*;
}
