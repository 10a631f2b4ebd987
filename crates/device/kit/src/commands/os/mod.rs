//! Dashboard and app management commands

mod close_app;
mod get_app_and_version;
mod get_os_version;
mod list_apps;
mod open_app;

pub use close_app::CloseApp;
pub use get_app_and_version::{AppAndVersion, GetAppAndVersion};
pub use get_os_version::{GetOsVersion, OsVersion};
pub use list_apps::ListAppsCommand;
pub use open_app::{OpenAppCommand, OpenAppError};

#[cfg(test)]
pub(crate) use list_apps::tests::page as list_apps_page;
