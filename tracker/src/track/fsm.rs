//! Finite state machine for a deployment tracking session

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::track::classify::{classify, Severity};
use crate::track::events::{Envelope, Origin, RemoteStatus, TrackerEvent};

/// Lifecycle state of a tracking session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Not started
    Idle,

    /// Following a running job
    Tracking,

    /// The job went live
    Succeeded,

    /// The job failed, timed out, or its status could not be followed
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Succeeded | LifecycleState::Failed)
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LifecycleState::Idle => "idle",
            LifecycleState::Tracking => "tracking",
            LifecycleState::Succeeded => "succeeded",
            LifecycleState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One entry of the deployment log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Strictly increasing within a session, starting at 1
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub severity: Severity,
    pub origin: Origin,
}

const LOG_CHUNK_LEN: usize = 256;

/// Append-only sequence of log records.
///
/// Clones share storage: full chunks are never copied again, and appending to
/// a shared log copies at most the open tail chunk.
#[derive(Debug, Clone, Default)]
pub struct LogRecords {
    // Every sealed chunk holds exactly LOG_CHUNK_LEN records
    sealed: Arc<Vec<Arc<[LogRecord]>>>,
    tail: Arc<Vec<LogRecord>>,
}

impl LogRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sealed.len() * LOG_CHUNK_LEN + self.tail.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Records in sequence order
    pub fn iter(&self) -> impl Iterator<Item = &LogRecord> + '_ {
        self.sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
    }

    /// Records from index `start` on, without walking the ones before it
    pub fn iter_from(&self, start: usize) -> impl Iterator<Item = &LogRecord> + '_ {
        let remaining = self.len().saturating_sub(start);
        let sealed = self.sealed.get(start / LOG_CHUNK_LEN..).unwrap_or(&[]);
        sealed
            .iter()
            .flat_map(|chunk| chunk.iter())
            .chain(self.tail.iter())
            .skip(start % LOG_CHUNK_LEN)
            .take(remaining)
    }

    pub fn get(&self, index: usize) -> Option<&LogRecord> {
        let chunk = index / LOG_CHUNK_LEN;
        match self.sealed.get(chunk) {
            Some(records) => records.get(index % LOG_CHUNK_LEN),
            None => self.tail.get(index - self.sealed.len() * LOG_CHUNK_LEN),
        }
    }

    pub fn last(&self) -> Option<&LogRecord> {
        self.tail
            .last()
            .or_else(|| self.sealed.last().and_then(|chunk| chunk.last()))
    }

    pub fn to_vec(&self) -> Vec<LogRecord> {
        self.iter().cloned().collect()
    }

    fn push(&mut self, record: LogRecord) {
        let tail = Arc::make_mut(&mut self.tail);
        tail.push(record);
        if tail.len() == LOG_CHUNK_LEN {
            let full: Arc<[LogRecord]> = std::mem::take(tail).into();
            Arc::make_mut(&mut self.sealed).push(full);
        }
    }
}

/// Last known view of the remote job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: LifecycleState,
    pub remote_status: Option<RemoteStatus>,
    pub domain: Option<String>,
    pub result_url: Option<String>,
}

impl StatusSnapshot {
    fn with_state(state: LifecycleState) -> Self {
        Self {
            state,
            remote_status: None,
            domain: None,
            result_url: None,
        }
    }
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self::with_state(LifecycleState::Idle)
    }
}

/// Outcome of processing one event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Nothing changed
    Ignored,

    /// Snapshot or log changed, still tracking
    Updated,

    /// The session reached a terminal state; channels must be torn down
    Terminal(LifecycleState),
}

/// Deployment tracking FSM.
///
/// Owns the status snapshot and the append-only log of one session.
#[derive(Debug, Clone)]
pub struct DeploymentFsm {
    job_id: String,
    state: LifecycleState,
    snapshot: Arc<StatusSnapshot>,
    log: LogRecords,
    next_sequence: u64,
    last_message: HashMap<Origin, String>,
    connected: HashSet<Origin>,
    watchdog: Duration,
}

impl DeploymentFsm {
    /// Create a new FSM in idle state
    pub fn new(job_id: impl Into<String>, watchdog: Duration) -> Self {
        Self {
            job_id: job_id.into(),
            state: LifecycleState::Idle,
            snapshot: Arc::new(StatusSnapshot::default()),
            log: LogRecords::new(),
            next_sequence: 1,
            last_message: HashMap::new(),
            connected: HashSet::new(),
            watchdog,
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.snapshot.clone()
    }

    pub fn log(&self) -> &LogRecords {
        &self.log
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Enter `Tracking`. Only valid from `Idle`.
    pub fn start(&mut self) -> Result<(), String> {
        if self.state != LifecycleState::Idle {
            return Err(format!("Invalid transition: {:?} -> Tracking", self.state));
        }
        self.state = LifecycleState::Tracking;
        self.snapshot = Arc::new(StatusSnapshot::with_state(LifecycleState::Tracking));
        Ok(())
    }

    /// Process an event from one of the channels
    pub fn process(&mut self, envelope: Envelope) -> Transition {
        if self.state != LifecycleState::Tracking {
            debug!(
                "Ignoring {:?} from {:?} in state {:?}",
                envelope.event, envelope.origin, self.state
            );
            return Transition::Ignored;
        }

        let origin = envelope.origin;
        match envelope.event {
            TrackerEvent::Connected => {
                if !self.connected.insert(origin) {
                    return Transition::Ignored;
                }
                self.append(origin, "✓ Connected to build stream", Severity::Success);
                Transition::Updated
            }

            TrackerEvent::LogLine(line) => {
                let line = line.trim_end();
                if line.trim().is_empty() {
                    return Transition::Ignored;
                }
                if self.last_message.get(&origin).map(String::as_str) == Some(line) {
                    return Transition::Ignored;
                }
                self.append(origin, line, classify(line));
                Transition::Updated
            }

            TrackerEvent::StatusUpdate { status, domain } => {
                let changed = self.snapshot.remote_status.as_ref() != Some(&status);
                if changed {
                    self.append(origin, &format!("⚙️ Status: {}", status), Severity::Info);
                }
                self.snapshot = Arc::new(StatusSnapshot {
                    state: LifecycleState::Tracking,
                    remote_status: Some(status),
                    domain,
                    result_url: None,
                });
                Transition::Updated
            }

            TrackerEvent::Complete {
                status,
                domain,
                url,
            } => {
                let result_url = url.or_else(|| domain.as_ref().map(|d| format!("http://{}", d)));
                if status == RemoteStatus::Live {
                    let message = match &result_url {
                        Some(url) => format!("✅ Deployment completed successfully! Live at {}", url),
                        None => "✅ Deployment completed successfully!".to_string(),
                    };
                    self.append(origin, &message, Severity::Success);
                    self.finish(LifecycleState::Succeeded, Some(status), domain, result_url)
                } else {
                    let message = if status == RemoteStatus::Failed {
                        "❌ Deployment failed. Please check the logs.".to_string()
                    } else {
                        format!("❌ Deployment ended with status {}", status)
                    };
                    self.append(origin, &message, Severity::Error);
                    self.finish(LifecycleState::Failed, Some(status), domain, result_url)
                }
            }

            TrackerEvent::TimedOut => {
                let message = match origin {
                    Origin::Watchdog => format!(
                        "⏱️ Deployment is taking longer than expected ({} limit)",
                        format_limit(self.watchdog)
                    ),
                    _ => "⏱️ Build stream timed out before the deployment finished".to_string(),
                };
                self.append(origin, &message, Severity::Error);
                self.append(
                    origin,
                    "💡 Check your dashboard - the deployment might still complete",
                    Severity::Info,
                );
                self.fail_keeping_remote()
            }

            TrackerEvent::RemoteError(message) => {
                self.append(origin, &format!("❌ {}", message), Severity::Error);
                self.fail_keeping_remote()
            }

            TrackerEvent::TransportError(message) => {
                self.append(
                    origin,
                    &format!(
                        "⚠️ Connection interrupted, but deployment may still be running ({})",
                        message
                    ),
                    Severity::Error,
                );
                self.append(
                    origin,
                    "💡 Check your dashboard in a moment to see the final status",
                    Severity::Info,
                );
                self.fail_keeping_remote()
            }
        }
    }

    fn append(&mut self, origin: Origin, message: &str, severity: Severity) {
        let record = LogRecord {
            sequence: self.next_sequence,
            timestamp: Utc::now(),
            message: message.to_string(),
            severity,
            origin,
        };
        self.next_sequence += 1;
        self.last_message.insert(origin, record.message.clone());
        self.log.push(record);
    }

    fn fail_keeping_remote(&mut self) -> Transition {
        let previous = self.snapshot.clone();
        self.finish(
            LifecycleState::Failed,
            previous.remote_status.clone(),
            previous.domain.clone(),
            previous.result_url.clone(),
        )
    }

    fn finish(
        &mut self,
        state: LifecycleState,
        remote_status: Option<RemoteStatus>,
        domain: Option<String>,
        result_url: Option<String>,
    ) -> Transition {
        self.state = state;
        self.snapshot = Arc::new(StatusSnapshot {
            state,
            remote_status,
            domain,
            result_url,
        });
        Transition::Terminal(state)
    }
}

fn format_limit(limit: Duration) -> String {
    let secs = limit.as_secs();
    if secs >= 60 && secs % 60 == 0 {
        format!("{} min", secs / 60)
    } else {
        format!("{}s", secs)
    }
}
