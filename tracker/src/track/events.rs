//! Normalized tracker events

use serde::{Deserialize, Serialize};

/// Status string reported by the build service for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RemoteStatus {
    Queued,
    Building,
    Live,
    Failed,
    Other(String),
}

impl RemoteStatus {
    /// Whether the service considers the job finished
    pub fn is_final(&self) -> bool {
        matches!(self, RemoteStatus::Live | RemoteStatus::Failed)
    }

    pub fn as_str(&self) -> &str {
        match self {
            RemoteStatus::Queued => "Queued",
            RemoteStatus::Building => "Building",
            RemoteStatus::Live => "Live",
            RemoteStatus::Failed => "Failed",
            RemoteStatus::Other(s) => s,
        }
    }
}

impl From<String> for RemoteStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "Queued" => RemoteStatus::Queued,
            "Building" => RemoteStatus::Building,
            "Live" => RemoteStatus::Live,
            "Failed" => RemoteStatus::Failed,
            _ => RemoteStatus::Other(s),
        }
    }
}

impl From<&str> for RemoteStatus {
    fn from(s: &str) -> Self {
        RemoteStatus::from(s.to_string())
    }
}

impl From<RemoteStatus> for String {
    fn from(status: RemoteStatus) -> Self {
        status.as_str().to_string()
    }
}

impl std::fmt::Display for RemoteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which producer delivered an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Server-pushed event stream
    Push,
    /// Interval status polling
    Poll,
    /// Session watchdog timer
    Watchdog,
}

/// Event emitted by the status channels, independent of transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A channel reached the service
    Connected,

    /// One line of build output
    LogLine(String),

    /// Intermediate job status
    StatusUpdate {
        status: RemoteStatus,
        domain: Option<String>,
    },

    /// The service reports the job finished
    Complete {
        status: RemoteStatus,
        domain: Option<String>,
        url: Option<String>,
    },

    /// No terminal signal within the allowed window
    TimedOut,

    /// The service reported an error for the job
    RemoteError(String),

    /// The channel failed and did not recover within the grace window
    TransportError(String),
}

impl TrackerEvent {
    /// Whether processing this event ends the session
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrackerEvent::Complete { .. }
                | TrackerEvent::TimedOut
                | TrackerEvent::RemoteError(_)
                | TrackerEvent::TransportError(_)
        )
    }
}

/// An event tagged with the producer that delivered it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub origin: Origin,
    pub event: TrackerEvent,
}

impl Envelope {
    pub fn new(origin: Origin, event: TrackerEvent) -> Self {
        Self { origin, event }
    }
}
