//! Live session state shared between the coordinator and callers.

use crate::error::{Result, ScrapeError};
use crate::events::{CompletionReport, EventBus, LogEntry, ProgressUpdate, ScrapeEvent};
use chrono::{DateTime, Utc};
use leadscrape_core::{SessionId, SessionStatus};
use serde::Serialize;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// What the coordinator should do once in-flight towns finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Run,
    Pause,
    Stop,
}

const RUN: u8 = 0;
const PAUSE: u8 = 1;
const STOP: u8 = 2;

/// Cooperative pause/stop flag for one session.
///
/// Workers are never interrupted; the coordinator checks the flag before
/// handing out each town.
#[derive(Debug, Default)]
pub struct SessionController {
    signal: AtomicU8,
}

impl SessionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a pause. Returns `false` if a stop is already pending.
    pub fn pause(&self) -> bool {
        self.signal
            .compare_exchange(RUN, PAUSE, Ordering::SeqCst, Ordering::SeqCst)
            .map_or_else(|current| current == PAUSE, |_| true)
    }

    /// Request a stop. Overrides a pending pause.
    pub fn stop(&self) {
        self.signal.store(STOP, Ordering::SeqCst);
    }

    pub fn signal(&self) -> ControlSignal {
        match self.signal.load(Ordering::SeqCst) {
            RUN => ControlSignal::Run,
            PAUSE => ControlSignal::Pause,
            _ => ControlSignal::Stop,
        }
    }
}

/// Point-in-time view of a session for operators.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatusReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub total_towns: u32,
    pub completed_towns: u32,
    pub failed_towns: u32,
    pub business_count: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub progress: Option<ProgressUpdate>,
    /// The most recent log entries, oldest first
    pub recent_logs: Vec<LogEntry>,
    /// Whether a coordinator is currently driving the session
    pub live: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct RuntimeSnapshot {
    pub status: SessionStatus,
    pub total_towns: u32,
    pub progress: Option<ProgressUpdate>,
    pub started_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// A session being driven by a coordinator task.
#[derive(Debug)]
pub(crate) struct SessionRuntime {
    pub session_id: SessionId,
    pub controller: Arc<SessionController>,
    pub events: EventBus,
    snapshot: RwLock<RuntimeSnapshot>,
}

impl SessionRuntime {
    pub fn new(session_id: SessionId, total_towns: u32, started_at: Option<DateTime<Utc>>) -> Self {
        Self {
            session_id,
            controller: Arc::new(SessionController::new()),
            events: EventBus::new(),
            snapshot: RwLock::new(RuntimeSnapshot {
                status: SessionStatus::Running,
                total_towns,
                progress: None,
                started_at,
                last_checkpoint_at: None,
                error_message: None,
            }),
        }
    }

    pub fn update(&self, apply: impl FnOnce(&mut RuntimeSnapshot)) {
        let mut snapshot = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
        apply(&mut snapshot);
    }

    pub fn report(&self) -> SessionStatusReport {
        let snapshot = self
            .snapshot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let progress = snapshot.progress.as_ref();
        SessionStatusReport {
            session_id: self.session_id.clone(),
            status: snapshot.status,
            total_towns: snapshot.total_towns,
            completed_towns: progress.map_or(0, |p| p.completed_towns),
            failed_towns: progress.map_or(0, |p| p.failed_towns),
            business_count: progress.map_or(0, |p| p.business_count),
            started_at: snapshot.started_at,
            last_checkpoint_at: snapshot.last_checkpoint_at,
            error_message: snapshot.error_message.clone(),
            progress: snapshot.progress.clone(),
            recent_logs: self.events.recent_logs(),
            live: true,
        }
    }
}

/// How a session run ended.
#[derive(Debug, Clone)]
pub enum SessionOutcome {
    /// The session reached a terminal state
    Finished(Box<CompletionReport>),
    /// The session was paused and can be resumed
    Paused {
        session_id: SessionId,
        pending_towns: Vec<String>,
    },
}

impl SessionOutcome {
    pub fn status(&self) -> SessionStatus {
        match self {
            Self::Finished(report) => report.status,
            Self::Paused { .. } => SessionStatus::Paused,
        }
    }

    /// The completion report, if the session finished.
    pub fn into_report(self) -> Option<CompletionReport> {
        match self {
            Self::Finished(report) => Some(*report),
            Self::Paused { .. } => None,
        }
    }
}

/// Returned by `start` and `resume`: the session id, its event stream and the
/// coordinator task.
pub struct SessionHandle {
    session_id: SessionId,
    events: broadcast::Receiver<ScrapeEvent>,
    controller: Arc<SessionController>,
    task: JoinHandle<Result<SessionOutcome>>,
}

impl SessionHandle {
    pub(crate) fn new(
        session_id: SessionId,
        events: broadcast::Receiver<ScrapeEvent>,
        controller: Arc<SessionController>,
        task: JoinHandle<Result<SessionOutcome>>,
    ) -> Self {
        Self {
            session_id,
            events,
            controller,
            task,
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Events published since the session was launched.
    pub fn events(&mut self) -> &mut broadcast::Receiver<ScrapeEvent> {
        &mut self.events
    }

    pub fn controller(&self) -> Arc<SessionController> {
        self.controller.clone()
    }

    /// Wait for the coordinator to finish.
    pub async fn wait(self) -> Result<SessionOutcome> {
        self.task
            .await
            .map_err(|e| ScrapeError::Task(e.to_string()))?
    }

    /// Wait for the coordinator and keep the events it published.
    pub async fn wait_with_events(self) -> Result<(SessionOutcome, Vec<ScrapeEvent>)> {
        let mut events = self.events;
        let outcome = self
            .task
            .await
            .map_err(|e| ScrapeError::Task(e.to_string()))??;

        let mut published = Vec::new();
        loop {
            match events.try_recv() {
                Ok(event) => published.push(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    tracing::warn!("Event receiver lagged, {} events dropped", skipped);
                }
                Err(_) => break,
            }
        }
        Ok((outcome, published))
    }
}
