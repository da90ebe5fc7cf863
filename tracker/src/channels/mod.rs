//! Status channels feeding the tracker
//!
//! Both sub-channels run as independent producers and deliver normalized
//! [`Envelope`]s into one queue. The consumer side lives in
//! [`crate::track::controller`].

pub mod poll;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::errors::TrackerError;
use crate::models::deployment::{JobStatus, StreamEvent};
use crate::track::events::Envelope;
use crate::track::fsm::StatusSnapshot;

/// Sending half of the tracker's event queue
pub type EventSender = mpsc::UnboundedSender<Envelope>;

/// The tracker's materialized status snapshot, as seen by the channels
pub type SnapshotReceiver = watch::Receiver<Arc<StatusSnapshot>>;

/// Decoded push frames; `Err(TrackerError::DecodeError)` items are skippable
pub type PushStream = BoxStream<'static, Result<StreamEvent, TrackerError>>;

/// Server-pushed status events for a job
#[async_trait]
pub trait PushSource: Send + Sync {
    /// Open the event stream for a job
    async fn open(&self, job_id: &str) -> Result<PushStream, TrackerError>;
}

/// Pull-based status lookups for a job
#[async_trait]
pub trait PollSource: Send + Sync {
    /// Fetch the current status and accumulated raw log of a job
    async fn fetch_status(&self, job_id: &str) -> Result<JobStatus, TrackerError>;
}

/// Channel timing options
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// How long a push transport failure may last before it is reported
    pub grace: Duration,

    /// Interval between status polls
    pub poll_interval: Duration,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            grace: Duration::from_secs(3),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// The set of running sub-channels for one job
pub struct Adapter {
    job_id: String,
    tasks: Vec<JoinHandle<()>>,
    closed: bool,
}

impl Adapter {
    /// Spawn the configured sub-channels. Must be called within a tokio runtime.
    pub fn open(
        job_id: &str,
        push_source: Option<Arc<dyn PushSource>>,
        poll_source: Option<Arc<dyn PollSource>>,
        options: &ChannelOptions,
        snapshot: SnapshotReceiver,
        tx: EventSender,
    ) -> Self {
        let mut tasks = Vec::with_capacity(2);

        if let Some(source) = push_source {
            let job_id = job_id.to_string();
            let grace = options.grace;
            let tx = tx.clone();
            tasks.push(tokio::spawn(async move {
                push::run(&job_id, source.as_ref(), grace, &tx).await;
            }));
        }

        if let Some(source) = poll_source {
            let job_id = job_id.to_string();
            let interval = options.poll_interval;
            tasks.push(tokio::spawn(async move {
                poll::run(&job_id, source.as_ref(), interval, &snapshot, &tx).await;
            }));
        }

        Self {
            job_id: job_id.to_string(),
            tasks,
            closed: false,
        }
    }

    /// Number of sub-channels that were started
    pub fn channel_count(&self) -> usize {
        self.tasks.len()
    }

    /// Stop all sub-channels. Returns `false` if already closed.
    pub fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }
        self.closed = true;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        debug!("Closed status channels for {}", self.job_id);
        true
    }
}

impl Drop for Adapter {
    fn drop(&mut self) {
        self.close();
    }
}
