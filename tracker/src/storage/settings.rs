//! Settings file management

use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer};

use crate::channels::ChannelOptions;
use crate::errors::TrackerError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::track::controller::TrackerSettings;

/// Tracker settings file
#[derive(Debug, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit diagnostics as JSON
    #[serde(default)]
    pub log_json: bool,

    /// Backend configuration
    #[serde(default)]
    pub backend: BackendSettings,

    /// Credential for the build service
    #[serde(default, deserialize_with = "deserialize_token")]
    pub token: Option<SecretString>,

    /// Run the push sub-channel
    #[serde(default = "default_true")]
    pub enable_push: bool,

    /// Run the poll sub-channel
    #[serde(default = "default_true")]
    pub enable_poll: bool,

    /// Polling interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Transport error grace window in seconds
    #[serde(default = "default_grace")]
    pub grace_secs: u64,

    /// Session watchdog in seconds
    #[serde(default = "default_watchdog")]
    pub watchdog_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    5
}

fn default_grace() -> u64 {
    3
}

fn default_watchdog() -> u64 {
    900
}

fn deserialize_token<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.filter(|t| !t.is_empty()).map(SecretString::from))
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_json: false,
            backend: BackendSettings::default(),
            token: None,
            enable_push: true,
            enable_poll: true,
            poll_interval_secs: default_poll_interval(),
            grace_secs: default_grace(),
            watchdog_secs: default_watchdog(),
        }
    }
}

impl Settings {
    /// Load settings from a file, falling back to defaults when it does not exist
    pub async fn load(file: &File) -> Result<Self, TrackerError> {
        Ok(file.read_json_opt().await?.unwrap_or_default())
    }

    /// Timing settings for the tracker
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            channels: ChannelOptions {
                grace: Duration::from_secs(self.grace_secs),
                poll_interval: Duration::from_secs(self.poll_interval_secs),
            },
            watchdog: Duration::from_secs(self.watchdog_secs),
        }
    }
}

/// Backend API settings
#[derive(Debug, Clone, Deserialize)]
pub struct BackendSettings {
    /// Base URL for the backend API
    #[serde(default = "default_backend_url")]
    pub base_url: String,

    /// Timeout for regular requests in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_backend_url() -> String {
    "http://localhost:8000/api/v1".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}
