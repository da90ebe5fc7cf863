//! Push sub-channel: server-sent status events

use std::collections::VecDeque;
use std::fmt::Display;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::channels::{EventSender, PushSource, PushStream};
use crate::errors::TrackerError;
use crate::models::deployment::StreamEvent;
use crate::track::events::{Envelope, Origin, TrackerEvent};

/// Longest SSE line accepted before the decoder gives up on it
pub const MAX_LINE_BYTES: usize = 64 * 1024;

const RECONNECT_BACKOFF: Duration = Duration::from_millis(250);
const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

enum StreamEnd {
    /// A terminal event was forwarded or the consumer went away
    Finished,
    /// The stream broke; `progressed` is set if it delivered any frame
    Interrupted { reason: String, progressed: bool },
}

/// Follow the push stream of a job until it delivers a terminal event.
///
/// A broken stream is reopened with backoff for up to `grace`. The failure is
/// reported only if no reopened stream delivers a frame within that window.
/// If the session reaches a terminal state first, this task is aborted and
/// nothing is reported.
pub async fn run(job_id: &str, source: &dyn PushSource, grace: Duration, tx: &EventSender) {
    info!("Push channel starting for {}", job_id);

    let mut deadline: Option<Instant> = None;
    let mut backoff = RECONNECT_BACKOFF;
    let mut failure = String::new();

    loop {
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(backoff.min(deadline - now)).await;
            if Instant::now() >= deadline {
                break;
            }
            backoff = (backoff * 2).min(MAX_RECONNECT_BACKOFF);
            debug!("Reopening push stream for {}", job_id);
        }

        let opened = match deadline {
            Some(deadline) => match tokio::time::timeout_at(deadline, source.open(job_id)).await {
                Ok(opened) => opened,
                Err(_) => break,
            },
            None => source.open(job_id).await,
        };

        let (reason, progressed) = match opened {
            Ok(stream) => match follow(job_id, stream, tx).await {
                StreamEnd::Finished => return,
                StreamEnd::Interrupted { reason, progressed } => (reason, progressed),
            },
            Err(e) => (e.to_string(), false),
        };

        if progressed || deadline.is_none() {
            warn!(
                "Push channel for {} interrupted ({}), retrying for {:?}",
                job_id, reason, grace
            );
            deadline = Some(Instant::now() + grace);
            backoff = RECONNECT_BACKOFF;
        }
        failure = reason;
    }

    warn!("Push channel for {} did not recover: {}", job_id, failure);
    let _ = tx.send(Envelope::new(
        Origin::Push,
        TrackerEvent::TransportError(failure),
    ));
}

async fn follow(job_id: &str, mut stream: PushStream, tx: &EventSender) -> StreamEnd {
    if tx.send(Envelope::new(Origin::Push, TrackerEvent::Connected)).is_err() {
        return StreamEnd::Finished;
    }

    let mut progressed = false;
    loop {
        match stream.next().await {
            Some(Ok(frame)) => {
                progressed = true;
                let event = TrackerEvent::from(frame);
                let terminal = event.is_terminal();
                debug!("Push event for {}: {:?}", job_id, event);
                if tx.send(Envelope::new(Origin::Push, event)).is_err() {
                    return StreamEnd::Finished;
                }
                if terminal {
                    debug!("Push channel for {} delivered a terminal event", job_id);
                    return StreamEnd::Finished;
                }
            }
            Some(Err(TrackerError::DecodeError(e))) => {
                warn!("Skipping undecodable push frame: {}", e);
            }
            Some(Err(e)) => {
                return StreamEnd::Interrupted {
                    reason: e.to_string(),
                    progressed,
                }
            }
            None => {
                return StreamEnd::Interrupted {
                    reason: "build stream closed".to_string(),
                    progressed,
                }
            }
        }
    }
}

/// Decode a `text/event-stream` body into stream events.
///
/// Body errors end up as `TransportError` items, bad payloads as `DecodeError`.
pub fn event_stream<S, B, E>(body: S) -> PushStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Display + Send + 'static,
{
    let pending = VecDeque::<Result<String, TrackerError>>::new();
    futures::stream::unfold(
        (Box::pin(body), SseDecoder::new(), pending),
        |(mut body, mut decoder, mut pending)| async move {
            loop {
                if let Some(payload) = pending.pop_front() {
                    let item = payload.and_then(|p| decode_frame(&p));
                    return Some((item, (body, decoder, pending)));
                }
                match body.next().await {
                    Some(Ok(chunk)) => pending.extend(decoder.feed(chunk.as_ref())),
                    Some(Err(e)) => {
                        let item = Err(TrackerError::TransportError(e.to_string()));
                        return Some((item, (body, decoder, pending)));
                    }
                    None => return None,
                }
            }
        },
    )
    .boxed()
}

fn decode_frame(payload: &str) -> Result<StreamEvent, TrackerError> {
    serde_json::from_str(payload)
        .map_err(|e| TrackerError::DecodeError(format!("{} in {}", e, payload)))
}

/// Incremental decoder for `text/event-stream` bodies
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: Vec<String>,
    // Dropping the rest of an oversized line
    skipping: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of the body; returns the payloads of every event it completed.
    ///
    /// A line longer than [`MAX_LINE_BYTES`] is discarded along with the event
    /// it belongs to and reported as a `DecodeError`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Result<String, TrackerError>> {
        self.buffer.extend_from_slice(chunk);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            if self.skipping {
                self.skipping = false;
                continue;
            }
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim_end_matches(['\n', '\r']);

            if line.is_empty() {
                if !self.data.is_empty() {
                    payloads.push(Ok(self.data.join("\n")));
                    self.data.clear();
                }
            } else if line.starts_with(':') {
                // comment / keep-alive
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            }
        }

        if self.buffer.len() > MAX_LINE_BYTES {
            if !self.skipping {
                payloads.push(Err(TrackerError::DecodeError(format!(
                    "event stream line exceeds {} bytes",
                    MAX_LINE_BYTES
                ))));
            }
            self.buffer.clear();
            self.data.clear();
            self.skipping = true;
        }
        payloads
    }
}
