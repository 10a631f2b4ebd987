//! Kit configuration
//!
//! Durations are written in milliseconds. [`KitConfig::load`] layers a TOML file
//! and `NEXUM_DEVICE_*` environment variables over the defaults, e.g.
//! `NEXUM_DEVICE_REFRESHER__INTERVAL_MS=500`.

use std::{path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use nexum_device_transport::HidConnectionOptions;
use serde::{Deserialize, Serialize};

use crate::error::KitError;

/// Prefix of the environment variables read by [`KitConfig::load`]
pub const ENV_PREFIX: &str = "NEXUM_DEVICE_";

/// Background state polling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefresherConfig {
    /// Whether sessions poll the device at all
    pub enabled: bool,
    /// Delay between two polls
    #[serde(rename = "interval_ms", with = "duration_ms")]
    pub interval: Duration,
}

impl Default for RefresherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_millis(1000),
        }
    }
}

/// Configuration of a [`DeviceManagementKit`](crate::DeviceManagementKit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    /// Session refresher settings
    pub refresher: RefresherConfig,
    /// How long a USB device may take to re-enumerate
    #[serde(rename = "reconnection_timeout_ms", with = "duration_ms")]
    pub reconnection_timeout: Duration,
    /// How long device actions wait for the user to unlock the device
    #[serde(rename = "unlock_timeout_ms", with = "duration_ms")]
    pub unlock_timeout: Duration,
    /// Default bound on a single APDU exchange, unbounded when unset
    #[serde(rename = "apdu_timeout_ms", with = "option_duration_ms")]
    pub apdu_timeout: Option<Duration>,
    /// USB HID report size
    pub hid_frame_size: usize,
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            refresher: RefresherConfig::default(),
            reconnection_timeout: Duration::from_millis(5000),
            unlock_timeout: Duration::from_millis(15000),
            apdu_timeout: None,
            hid_frame_size: 64,
        }
    }
}

impl KitConfig {
    /// Load the configuration from a TOML file and the environment.
    ///
    /// A missing file is not an error; the defaults apply.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, KitError> {
        Self::extract(Figment::new().merge(Toml::file(path.as_ref())))
    }

    /// Parse a TOML document, then apply the environment
    pub fn from_toml_str(toml: &str) -> Result<Self, KitError> {
        Self::extract(Figment::new().merge(Toml::string(toml)))
    }

    fn extract(figment: Figment) -> Result<Self, KitError> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(figment)
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| KitError::Config(Box::new(e)))
    }

    /// Set the refresher settings
    pub const fn with_refresher(mut self, refresher: RefresherConfig) -> Self {
        self.refresher = refresher;
        self
    }

    /// Set the refresher polling interval
    pub const fn with_refresher_interval(mut self, interval: Duration) -> Self {
        self.refresher.interval = interval;
        self
    }

    /// Enable or disable session refreshers
    pub const fn with_refresher_enabled(mut self, enabled: bool) -> Self {
        self.refresher.enabled = enabled;
        self
    }

    /// Set the USB reconnection timeout
    pub const fn with_reconnection_timeout(mut self, timeout: Duration) -> Self {
        self.reconnection_timeout = timeout;
        self
    }

    /// Set the unlock timeout
    pub const fn with_unlock_timeout(mut self, timeout: Duration) -> Self {
        self.unlock_timeout = timeout;
        self
    }

    /// Set the default APDU timeout
    pub const fn with_apdu_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.apdu_timeout = timeout;
        self
    }

    /// Set the USB HID report size
    pub const fn with_hid_frame_size(mut self, frame_size: usize) -> Self {
        self.hid_frame_size = frame_size;
        self
    }

    /// Options for opening USB HID connections with this configuration
    pub const fn hid_connection_options(&self) -> HidConnectionOptions {
        HidConnectionOptions {
            frame_size: self.hid_frame_size,
            reconnection_timeout: self.reconnection_timeout,
        }
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(
        value: &Option<Duration>,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(value) => s.serialize_some(&(value.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = KitConfig::default();
        assert!(config.refresher.enabled);
        assert_eq!(config.refresher.interval, Duration::from_secs(1));
        assert_eq!(config.reconnection_timeout, Duration::from_secs(5));
        assert_eq!(config.unlock_timeout, Duration::from_secs(15));
        assert_eq!(config.apdu_timeout, None);
        assert_eq!(config.hid_frame_size, 64);
    }

    #[test]
    fn test_from_toml() {
        let config = KitConfig::from_toml_str(
            r#"
            unlock_timeout_ms = 2000
            apdu_timeout_ms = 750

            [refresher]
            enabled = false
            "#,
        )
        .unwrap();
        assert!(!config.refresher.enabled);
        assert_eq!(config.refresher.interval, Duration::from_secs(1));
        assert_eq!(config.unlock_timeout, Duration::from_secs(2));
        assert_eq!(config.apdu_timeout, Some(Duration::from_millis(750)));
        assert_eq!(config.reconnection_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let path = std::env::temp_dir().join(format!("{}.toml", uuid::Uuid::new_v4()));
        assert_eq!(KitConfig::load(path).unwrap(), KitConfig::default());
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = KitConfig::from_toml_str("hid_frame_size = \"large\"").unwrap_err();
        assert!(matches!(err, KitError::Config(_)));
    }

    #[test]
    fn test_builders() {
        let config = KitConfig::default()
            .with_refresher_interval(Duration::from_millis(250))
            .with_hid_frame_size(128)
            .with_reconnection_timeout(Duration::from_secs(1));
        let options = config.hid_connection_options();
        assert_eq!(options.frame_size, 128);
        assert_eq!(options.reconnection_timeout, Duration::from_secs(1));
        assert_eq!(config.refresher.interval, Duration::from_millis(250));
    }
}
