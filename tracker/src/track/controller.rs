//! Lifecycle controller for tracking sessions
//!
//! A [`Tracker`] runs at most one session at a time. Each session owns the
//! status channels, a watchdog timer and a consumer task that feeds every
//! queued [`Envelope`] through a [`DeploymentFsm`] and publishes the result
//! as a [`TrackerView`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::AbortHandle;
use tracing::{debug, info};
use uuid::Uuid;

use crate::channels::{Adapter, ChannelOptions, PollSource, PushSource};
use crate::errors::TrackerError;
use crate::track::events::{Envelope, Origin, TrackerEvent};
use crate::track::fsm::{DeploymentFsm, LifecycleState, LogRecords, StatusSnapshot, Transition};

/// Tracker settings
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Sub-channel timing
    pub channels: ChannelOptions,

    /// Maximum time a session may stay in `Tracking`
    pub watchdog: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            channels: ChannelOptions::default(),
            watchdog: Duration::from_secs(900),
        }
    }
}

impl TrackerSettings {
    /// Check the timing relationships the tracker relies on
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.channels.grace >= self.watchdog {
            return Err(TrackerError::ConfigError(format!(
                "grace window ({:?}) must be shorter than the watchdog ({:?})",
                self.channels.grace, self.watchdog
            )));
        }
        if self.channels.poll_interval.is_zero() {
            return Err(TrackerError::ConfigError("poll interval must be positive".to_string()));
        }
        Ok(())
    }
}

/// Why a session's resources were released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TeardownReason {
    Terminal,
    Cancelled,
}

/// Everything a UI needs to render the tracker.
///
/// Published as a whole on every change; never mutated in place. The log
/// shares its storage with the state machine, so publishing does not copy it.
#[derive(Debug, Clone)]
pub struct TrackerView {
    pub session_id: Option<Uuid>,
    pub job_id: Option<String>,
    pub state: LifecycleState,
    pub snapshot: Arc<StatusSnapshot>,
    pub log: LogRecords,
    pub teardown: Option<TeardownReason>,
}

impl Default for TrackerView {
    fn default() -> Self {
        Self {
            session_id: None,
            job_id: None,
            state: LifecycleState::Idle,
            snapshot: Arc::new(StatusSnapshot::default()),
            log: LogRecords::new(),
            teardown: None,
        }
    }
}

impl TrackerView {
    fn of(session_id: Uuid, fsm: &DeploymentFsm, teardown: Option<TeardownReason>) -> Self {
        Self {
            session_id: Some(session_id),
            job_id: Some(fsm.job_id().to_string()),
            state: fsm.state(),
            snapshot: fsm.snapshot(),
            log: fsm.log().clone(),
            teardown,
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One-shot release of a session's channels and timers
struct Teardown {
    session_id: Uuid,
    done: AtomicBool,
    adapter: Mutex<Option<Adapter>>,
    timers: Mutex<Vec<AbortHandle>>,
    view_tx: Arc<watch::Sender<TrackerView>>,
}

impl Teardown {
    fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }

    /// Release everything. Returns `false` if the session was already torn down.
    ///
    /// `final_view` replaces the published view together with the reason.
    fn run(&self, reason: TeardownReason, final_view: Option<TrackerView>) -> bool {
        if self.done.swap(true, Ordering::SeqCst) {
            return false;
        }

        if let Some(mut adapter) = lock(&self.adapter).take() {
            adapter.close();
        }
        for timer in lock(&self.timers).drain(..) {
            timer.abort();
        }

        let session_id = self.session_id;
        self.view_tx.send_if_modified(|view| {
            if view.session_id != Some(session_id) {
                return false;
            }
            let mut next = final_view.unwrap_or_else(|| view.clone());
            next.teardown = Some(reason);
            *view = next;
            true
        });

        info!("Session {} torn down ({:?})", session_id, reason);
        true
    }
}

struct ActiveSession {
    job_id: String,
    teardown: Arc<Teardown>,
    consumer: AbortHandle,
}

/// Handle to a running tracking session
pub struct Session {
    job_id: String,
    session_id: Uuid,
    view_rx: watch::Receiver<TrackerView>,
}

impl Session {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Latest published view
    pub fn view(&self) -> TrackerView {
        self.view_rx.borrow().clone()
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.view_rx.borrow().snapshot.clone()
    }

    pub fn log(&self) -> LogRecords {
        self.view_rx.borrow().log.clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view_rx.clone()
    }

    /// Wait until this session is torn down, for whatever reason
    pub async fn wait_terminal(&mut self) -> TrackerView {
        let session_id = self.session_id;
        let result = self
            .view_rx
            .wait_for(|view| view.session_id != Some(session_id) || view.teardown.is_some())
            .await
            .map(|view| (*view).clone());

        match result {
            Ok(view) => view,
            Err(_) => self.view_rx.borrow().clone(),
        }
    }
}

/// Deployment status tracker
pub struct Tracker {
    settings: TrackerSettings,
    push_source: Option<Arc<dyn PushSource>>,
    poll_source: Option<Arc<dyn PollSource>>,
    view_tx: Arc<watch::Sender<TrackerView>>,
    active: Mutex<Option<ActiveSession>>,
}

impl Tracker {
    /// Create a tracker. At least one of the sources must be given.
    pub fn new(
        settings: TrackerSettings,
        push_source: Option<Arc<dyn PushSource>>,
        poll_source: Option<Arc<dyn PollSource>>,
    ) -> Result<Self, TrackerError> {
        settings.validate()?;
        if push_source.is_none() && poll_source.is_none() {
            return Err(TrackerError::ConfigError(
                "at least one status channel must be enabled".to_string(),
            ));
        }

        let (view_tx, _) = watch::channel(TrackerView::default());
        Ok(Self {
            settings,
            push_source,
            poll_source,
            view_tx: Arc::new(view_tx),
            active: Mutex::new(None),
        })
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    /// Start tracking a job. Must be called within a tokio runtime.
    pub fn start(&self, job_id: &str) -> Result<Session, TrackerError> {
        let mut active = lock(&self.active);
        if let Some(current) = active.as_ref() {
            if !current.teardown.is_done() {
                return Err(TrackerError::AlreadyTrackingError(current.job_id.clone()));
            }
        }
        if job_id.trim().is_empty() {
            return Err(TrackerError::ConfigError("job id must not be empty".to_string()));
        }

        let session_id = Uuid::new_v4();
        let mut fsm = DeploymentFsm::new(job_id, self.settings.watchdog);
        fsm.start().map_err(TrackerError::Internal)?;
        self.view_tx.send_replace(TrackerView::of(session_id, &fsm, None));

        let (tx, rx) = mpsc::unbounded_channel();
        let (snapshot_tx, snapshot_rx) = watch::channel(fsm.snapshot());
        let adapter = Adapter::open(
            job_id,
            self.push_source.clone(),
            self.poll_source.clone(),
            &self.settings.channels,
            snapshot_rx,
            tx.clone(),
        );
        info!(
            "Tracking {} (session {}, {} channel(s), watchdog {:?})",
            job_id,
            session_id,
            adapter.channel_count(),
            self.settings.watchdog
        );

        let watchdog = self.settings.watchdog;
        let watchdog_task = tokio::spawn(async move {
            tokio::time::sleep(watchdog).await;
            debug!("Watchdog expired after {:?}", watchdog);
            let _ = tx.send(Envelope::new(Origin::Watchdog, TrackerEvent::TimedOut));
        });

        let teardown = Arc::new(Teardown {
            session_id,
            done: AtomicBool::new(false),
            adapter: Mutex::new(Some(adapter)),
            timers: Mutex::new(vec![watchdog_task.abort_handle()]),
            view_tx: self.view_tx.clone(),
        });

        let consumer = tokio::spawn(consume(session_id, fsm, rx, snapshot_tx, teardown.clone()));

        *active = Some(ActiveSession {
            job_id: job_id.to_string(),
            teardown,
            consumer: consumer.abort_handle(),
        });

        Ok(Session {
            job_id: job_id.to_string(),
            session_id,
            view_rx: self.view_tx.subscribe(),
        })
    }

    /// Stop the active session without forcing a terminal state.
    ///
    /// Safe to call at any time; does nothing when no session is active.
    pub fn cancel(&self) {
        let Some(session) = lock(&self.active).take() else {
            debug!("Cancel requested with no active session");
            return;
        };

        session.consumer.abort();
        if session.teardown.run(TeardownReason::Cancelled, None) {
            info!("Cancelled tracking of {}", session.job_id);
        }
    }

    /// Whether a session is running
    pub fn is_active(&self) -> bool {
        lock(&self.active)
            .as_ref()
            .is_some_and(|s| !s.teardown.is_done())
    }

    /// Latest published view
    pub fn view(&self) -> TrackerView {
        self.view_tx.borrow().clone()
    }

    pub fn state(&self) -> LifecycleState {
        self.view_tx.borrow().state
    }

    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.view_tx.borrow().snapshot.clone()
    }

    pub fn log(&self) -> LogRecords {
        self.view_tx.borrow().log.clone()
    }

    /// Receiver notified on every published change
    pub fn subscribe(&self) -> watch::Receiver<TrackerView> {
        self.view_tx.subscribe()
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

async fn consume(
    session_id: Uuid,
    mut fsm: DeploymentFsm,
    mut rx: mpsc::UnboundedReceiver<Envelope>,
    snapshot_tx: watch::Sender<Arc<StatusSnapshot>>,
    teardown: Arc<Teardown>,
) {
    while let Some(envelope) = rx.recv().await {
        let mut changed = false;
        let mut outcome = fsm.process(envelope);

        // Fold whatever else is already queued into one publish
        loop {
            match outcome {
                Transition::Terminal(state) => {
                    info!("Deployment {} finished: {}", fsm.job_id(), state);
                    let view = TrackerView::of(session_id, &fsm, None);
                    teardown.run(TeardownReason::Terminal, Some(view));
                    return;
                }
                Transition::Updated => changed = true,
                Transition::Ignored => {}
            }
            match rx.try_recv() {
                Ok(next) => outcome = fsm.process(next),
                Err(_) => break,
            }
        }

        if changed {
            snapshot_tx.send_replace(fsm.snapshot());
            let view = TrackerView::of(session_id, &fsm, None);
            teardown.view_tx.send_if_modified(|current| {
                if current.session_id != Some(session_id) || current.teardown.is_some() {
                    return false;
                }
                *current = view;
                true
            });
        }
    }
    debug!("Event queue for session {} closed", session_id);
}
