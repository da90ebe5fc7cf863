//! Application configuration options

use std::collections::HashMap;
use std::time::Duration;

use secrecy::SecretString;

use crate::errors::TrackerError;
use crate::logs::{LogLevel, LogOptions};
use crate::storage::settings::Settings;
use crate::track::controller::TrackerSettings;

/// Main application options
#[derive(Debug)]
pub struct AppOptions {
    /// Repository to deploy
    pub repo_url: String,

    /// Job identifier (project name)
    pub job_id: String,

    /// Backend API base URL
    pub backend_base_url: String,

    /// Timeout for regular requests
    pub request_timeout: Duration,

    /// Credential for the build service
    pub token: Option<SecretString>,

    /// Run the push sub-channel
    pub enable_push: bool,

    /// Run the poll sub-channel
    pub enable_poll: bool,

    /// Tracker timing
    pub tracker: TrackerSettings,

    /// Diagnostics logging
    pub logging: LogOptions,
}

impl AppOptions {
    /// Merge the settings file with `--key=value` command line flags
    pub fn resolve(
        settings: Settings,
        cli_args: &HashMap<String, String>,
    ) -> Result<Self, TrackerError> {
        let repo_url = required(cli_args, "repo")?;
        let job_id = required(cli_args, "project")?;

        let log_level = match cli_args.get("log-level") {
            Some(level) => level.parse::<LogLevel>().map_err(TrackerError::ConfigError)?,
            None => settings.log_level.clone(),
        };

        let tracker = settings.tracker_settings();
        let backend_base_url = cli_args
            .get("base-url")
            .cloned()
            .unwrap_or_else(|| settings.backend.base_url.clone());

        let token = match cli_args.get("token") {
            Some(token) if !token.is_empty() => Some(SecretString::from(token.clone())),
            _ => settings.token,
        };

        let options = Self {
            repo_url,
            job_id,
            backend_base_url,
            request_timeout: Duration::from_secs(settings.backend.request_timeout_secs),
            token,
            enable_push: settings.enable_push && !cli_args.contains_key("no-push"),
            enable_poll: settings.enable_poll && !cli_args.contains_key("no-poll"),
            tracker,
            logging: LogOptions {
                log_level,
                json_format: settings.log_json,
            },
        };
        options.validate()?;
        Ok(options)
    }

    /// Reject option combinations the tracker cannot run with
    pub fn validate(&self) -> Result<(), TrackerError> {
        if !self.enable_push && !self.enable_poll {
            return Err(TrackerError::ConfigError(
                "at least one of push or poll must be enabled".to_string(),
            ));
        }
        if self.enable_push && self.token.is_none() {
            return Err(TrackerError::ConfigError(
                "the push channel needs a token (--token= or settings.json)".to_string(),
            ));
        }
        self.tracker.validate()
    }
}

fn required(cli_args: &HashMap<String, String>, key: &str) -> Result<String, TrackerError> {
    cli_args
        .get(key)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| TrackerError::ConfigError(format!("missing --{}=<value>", key)))
}

/// Parse `--key=value` and `--flag` arguments
pub fn parse_cli_args<I: IntoIterator<Item = String>>(args: I) -> HashMap<String, String> {
    let mut cli_args = HashMap::new();

    for arg in args {
        if let Some((key, value)) = arg.split_once('=') {
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    cli_args
}
