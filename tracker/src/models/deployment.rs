//! Deployment models exchanged with the build service

use serde::{Deserialize, Serialize};

use crate::track::events::{RemoteStatus, TrackerEvent};

/// Request body of the initiate-deploy call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Source repository URL
    pub git_url: String,

    /// Job identifier (the project name)
    pub project_id: String,
}

/// Acknowledgement returned by the initiate-deploy call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployResponse {
    pub message: String,

    #[serde(default)]
    pub status: Option<String>,

    pub project_id: String,

    #[serde(default)]
    pub user_email: Option<String>,
}

/// Error body returned by the service
#[derive(Debug, Clone, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    /// The detail as plain text
    pub fn detail_text(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// A project as listed by the service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub status: RemoteStatus,

    #[serde(default)]
    pub domain: Option<String>,

    #[serde(default)]
    pub repo_url: Option<String>,

    #[serde(default)]
    pub last_deployed_at: Option<String>,
}

/// Build log response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectLogs {
    pub logs: String,
}

/// Placeholder returned by the logs endpoint before any build output exists
pub const NO_LOGS_PLACEHOLDER: &str = "No logs available yet.";

/// Result of one status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub status: RemoteStatus,
    pub domain: Option<String>,
    pub raw_log: Option<String>,
}

/// Payload of one push stream event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Connected {
        #[serde(default)]
        message: Option<String>,
    },
    Log {
        message: String,
    },
    Status {
        status: RemoteStatus,
        #[serde(default)]
        domain: Option<String>,
    },
    Complete {
        status: RemoteStatus,
        #[serde(default)]
        domain: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Timeout {
        #[serde(default)]
        message: Option<String>,
    },
    Error {
        message: String,
    },
}

impl From<StreamEvent> for TrackerEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::Connected { .. } => TrackerEvent::Connected,
            StreamEvent::Log { message } => TrackerEvent::LogLine(message),
            StreamEvent::Status { status, domain } => TrackerEvent::StatusUpdate { status, domain },
            StreamEvent::Complete {
                status,
                domain,
                url,
            } => TrackerEvent::Complete {
                status,
                domain,
                url,
            },
            StreamEvent::Timeout { .. } => TrackerEvent::TimedOut,
            StreamEvent::Error { message } => TrackerEvent::RemoteError(message),
        }
    }
}
