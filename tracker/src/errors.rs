//! Error types for the deployment tracker

use thiserror::Error;

/// Main error type for the deployment tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// The initiate-deploy request was rejected; carries the service's detail verbatim.
    #[error("Deployment failed: {0}")]
    InitiationError(String),

    /// A tracking session is already active for the given job.
    #[error("Already tracking job: {0}")]
    AlreadyTrackingError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<url::ParseError> for TrackerError {
    fn from(err: url::ParseError) -> Self {
        TrackerError::ConfigError(format!("invalid URL: {}", err))
    }
}

impl TrackerError {
    /// Whether the error comes from the transport layer and may clear up on its own
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            TrackerError::HttpError(_) | TrackerError::TransportError(_) | TrackerError::IoError(_)
        )
    }
}
