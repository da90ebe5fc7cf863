//! Pull sub-channel: interval status polling

use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::channels::{EventSender, PollSource, SnapshotReceiver};
use crate::errors::TrackerError;
use crate::track::events::{Envelope, Origin, TrackerEvent};

/// Poll the status of a job until it reports a final status.
///
/// The first poll happens immediately. Fetch failures are logged and retried
/// on the next tick. A non-final status is only reported when it differs from
/// the tracker's materialized snapshot, whichever channel set it.
pub async fn run(
    job_id: &str,
    source: &dyn PollSource,
    interval: Duration,
    snapshot: &SnapshotReceiver,
    tx: &EventSender,
) {
    info!("Poll channel starting for {} (every {:?})", job_id, interval);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut cursor = LogCursor::new();

    loop {
        ticker.tick().await;
        debug!("Polling status for {}", job_id);

        let status = match source.fetch_status(job_id).await {
            Ok(status) => status,
            Err(TrackerError::NotFound(e)) => {
                debug!("Job {} not visible yet: {}", job_id, e);
                continue;
            }
            Err(e) if e.is_transient() => {
                warn!("Status poll for {} failed, retrying: {}", job_id, e);
                continue;
            }
            Err(e) => {
                error!("Status poll for {} returned an unusable answer: {}", job_id, e);
                continue;
            }
        };

        if let Some(raw) = status.raw_log.as_deref() {
            for line in cursor.advance(raw) {
                if tx.send(Envelope::new(Origin::Poll, TrackerEvent::LogLine(line))).is_err() {
                    return;
                }
            }
        }

        let final_status = status.status.is_final();
        let materialized = snapshot.borrow().remote_status.as_ref() == Some(&status.status);
        if materialized && !final_status {
            continue;
        }

        let event = if final_status {
            TrackerEvent::Complete {
                status: status.status,
                domain: status.domain,
                url: None,
            }
        } else {
            TrackerEvent::StatusUpdate {
                status: status.status,
                domain: status.domain,
            }
        };
        let terminal = event.is_terminal();

        if tx.send(Envelope::new(Origin::Poll, event)).is_err() || terminal {
            return;
        }
    }
}

/// Tracks which lines of a growing raw log were already delivered
#[derive(Debug, Default)]
pub struct LogCursor {
    last_raw: String,
    delivered: usize,
}

impl LogCursor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lines of `raw` that were not delivered by a previous call
    pub fn advance(&mut self, raw: &str) -> Vec<String> {
        if raw == self.last_raw {
            return Vec::new();
        }

        let lines: Vec<&str> = raw.lines().filter(|l| !l.trim().is_empty()).collect();
        let fresh = if lines.len() < self.delivered {
            warn!(
                "Build log shrank from {} to {} lines, resynchronizing",
                self.delivered,
                lines.len()
            );
            Vec::new()
        } else {
            lines[self.delivered..].iter().map(|l| l.to_string()).collect()
        };

        self.delivered = lines.len();
        self.last_raw = raw.to_string();
        fresh
    }
}
