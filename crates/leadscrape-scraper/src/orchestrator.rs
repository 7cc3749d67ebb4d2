//! Scraping orchestrator.
//!
//! This module provides the `ScrapingOrchestrator`, the entry point for
//! starting, pausing, resuming and stopping scrape sessions. Each started
//! session runs on its own coordinator task with a bounded pool of browser
//! workers; the orchestrator keeps a handle on every live session so control
//! requests reach it by session id.

use crate::checkpoint::{self, PairFailure};
use crate::coordinator::{
    discard_scrape_retries, identify_session_carriers, Coordinator, RunPlan, Services,
};
use crate::error::{Result, ScrapeError};
use crate::events::{ScrapeEvent, SessionSummary};
use crate::session::{SessionHandle, SessionRuntime, SessionStatusReport};
use chrono::Utc;
use leadscrape_browser::BrowserLauncher;
use leadscrape_core::{ScrapeConfig, ScrapingConfig, SessionId, SessionStatus};
use leadscrape_db::{businesses, checkpoints, retry_queue, sessions, RetryKind, SessionRecord};
use leadscrape_lookup::{ProviderLookupService, RetryPolicy};
use sqlx::{Pool, Sqlite};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

pub use crate::coordinator::{LookupRetry, LookupTally};

/// Base delay between in-worker navigation retries.
const NAVIGATION_RETRY_DELAY_MS: u64 = 2000;

/// Ceiling for in-worker navigation retry delays.
const NAVIGATION_RETRY_MAX_DELAY_MS: u64 = 30_000;

type LiveSessions = Arc<Mutex<HashMap<SessionId, Arc<SessionRuntime>>>>;

/// Orchestrates scrape sessions.
#[derive(Clone)]
pub struct ScrapingOrchestrator {
    services: Services,
    /// Sessions with a running coordinator
    live: LiveSessions,
}

impl ScrapingOrchestrator {
    /// Create an orchestrator.
    ///
    /// `scraping` supplies the retry budgets and browser teardown policy;
    /// concurrency limits come from each session's own configuration.
    #[must_use]
    pub fn new(
        pool: Pool<Sqlite>,
        launcher: Arc<dyn BrowserLauncher>,
        lookup: Arc<ProviderLookupService>,
        scraping: ScrapingConfig,
    ) -> Self {
        let backoff = RetryPolicy::new(
            scraping.max_industry_attempts,
            Duration::from_millis(NAVIGATION_RETRY_DELAY_MS),
            Duration::from_millis(NAVIGATION_RETRY_MAX_DELAY_MS),
        );
        Self {
            services: Services {
                pool,
                launcher,
                lookup,
                scraping,
                backoff,
            },
            live: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Set the backoff between navigation retries.
    #[must_use]
    pub fn with_backoff(mut self, backoff: RetryPolicy) -> Self {
        self.services.backoff = backoff;
        self
    }

    /// Start a new session and return immediately.
    ///
    /// The returned handle is subscribed before the first event is
    /// published, so it observes the whole run.
    pub async fn start(&self, config: ScrapeConfig) -> Result<SessionHandle> {
        config.validate()?;

        let session_id = SessionId::generate();
        sessions::create_session(&self.services.pool, &session_id, &config).await?;
        tracing::info!(
            session_id = %session_id,
            "Starting session: {} towns x {} industries",
            config.towns.len(),
            config.industries.len()
        );

        self.launch(session_id, RunPlan::fresh(config)).await
    }

    /// Continue a paused session, or one left `running` by a crashed process.
    ///
    /// The town queue is rebuilt from the checkpoint; towns that were in
    /// flight when the checkpoint was written are attempted again. Due
    /// navigation and extraction retries of the session run first.
    pub async fn resume(&self, session_id: &SessionId) -> Result<SessionHandle> {
        if self.runtime(session_id).is_some() {
            return Err(ScrapeError::SessionActive(session_id.clone()));
        }

        let record = self.record(session_id).await?;
        match record.status {
            SessionStatus::Paused | SessionStatus::Running | SessionStatus::Pending => {}
            status => {
                return Err(ScrapeError::InvalidState {
                    session_id: session_id.clone(),
                    status,
                    action: "resume",
                })
            }
        }

        let saved = checkpoint::load(&self.services.pool, session_id).await?;
        if saved.is_none() && record.status != SessionStatus::Pending {
            tracing::warn!(session_id = %session_id, "No checkpoint found, resuming from the first town");
        }
        // A town still pending may have stored records before the process
        // died; it is scraped again from scratch.
        let pending = saved
            .as_ref()
            .map_or(&record.config.towns, |c| &c.batch.pending_towns);
        let dropped =
            businesses::delete_town_businesses(&self.services.pool, session_id, pending).await?;
        if dropped > 0 {
            tracing::warn!(
                session_id = %session_id,
                "Dropped {} records of towns that never reached a checkpoint",
                dropped
            );
        }

        let mut retries = retry_queue::dequeue_eligible_for_session(
            &self.services.pool,
            session_id,
            Utc::now(),
            &[RetryKind::Navigation, RetryKind::Extraction],
        )
        .await?;
        retries.retain(|item| {
            item.payload_as::<PairFailure>()
                .map_or(true, |pair| !pending.contains(&pair.town))
        });
        let stored = businesses::count_businesses(&self.services.pool, session_id).await?;

        tracing::info!(
            session_id = %session_id,
            "Resuming {} session with {} queued retries",
            record.status,
            retries.len()
        );
        let plan = RunPlan::resumed(record.config, saved, retries, stored);
        self.launch(session_id.clone(), plan).await
    }

    /// Ask a live session to pause once its in-flight towns finish.
    ///
    /// Pausing an already paused session is a no-op.
    pub async fn pause(&self, session_id: &SessionId) -> Result<()> {
        if let Some(runtime) = self.runtime(session_id) {
            if !runtime.controller.pause() {
                return Err(ScrapeError::InvalidState {
                    session_id: session_id.clone(),
                    status: SessionStatus::Stopped,
                    action: "pause",
                });
            }
            runtime
                .events
                .info("Pause requested, finishing in-flight towns");
            return Ok(());
        }

        let record = self.record(session_id).await?;
        if record.status == SessionStatus::Paused {
            return Ok(());
        }
        Err(ScrapeError::InvalidState {
            session_id: session_id.clone(),
            status: record.status,
            action: "pause",
        })
    }

    /// Stop a session.
    ///
    /// A live session finishes its in-flight towns and is finalized
    /// `stopped` without a carrier lookup. A paused or interrupted session is
    /// marked `stopped` directly and its checkpoint discarded.
    pub async fn stop(&self, session_id: &SessionId) -> Result<()> {
        if let Some(runtime) = self.runtime(session_id) {
            runtime.controller.stop();
            runtime
                .events
                .info("Stop requested, finishing in-flight towns");
            return Ok(());
        }

        let record = self.record(session_id).await?;
        if !matches!(record.status, SessionStatus::Paused | SessionStatus::Running) {
            return Err(ScrapeError::InvalidState {
                session_id: session_id.clone(),
                status: record.status,
                action: "stop",
            });
        }
        self.stop_detached(&record).await
    }

    /// Request a stop on every live session. Returns how many were asked.
    pub fn stop_all(&self) -> usize {
        let live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        for runtime in live.values() {
            runtime.controller.stop();
        }
        live.len()
    }

    /// Current state of a session plus its most recent log entries.
    ///
    /// Sessions without a live coordinator are reported from storage and
    /// carry no log entries.
    pub async fn status(&self, session_id: &SessionId) -> Result<SessionStatusReport> {
        if let Some(runtime) = self.runtime(session_id) {
            return Ok(runtime.report());
        }

        let record = self.record(session_id).await?;
        Ok(SessionStatusReport {
            session_id: record.id,
            status: record.status,
            total_towns: record.total_towns,
            completed_towns: record.completed_towns,
            failed_towns: record.failed_towns,
            business_count: usize::try_from(record.business_count).unwrap_or(usize::MAX),
            started_at: record.started_at,
            last_checkpoint_at: record.last_checkpoint_at,
            error_message: record.error_message,
            progress: None,
            recent_logs: Vec::new(),
            live: false,
        })
    }

    /// Subscribe to the events of a live session.
    pub fn subscribe(&self, session_id: &SessionId) -> Option<broadcast::Receiver<ScrapeEvent>> {
        self.runtime(session_id).map(|runtime| runtime.events.subscribe())
    }

    /// Every stored session, newest first.
    pub async fn sessions(&self) -> Result<Vec<SessionRecord>> {
        Ok(sessions::list_sessions(&self.services.pool).await?)
    }

    /// Sessions stored as `running` that no coordinator in this process owns.
    pub async fn interrupted_sessions(&self) -> Result<Vec<SessionRecord>> {
        let running =
            sessions::list_sessions_by_status(&self.services.pool, SessionStatus::Running).await?;
        Ok(running
            .into_iter()
            .filter(|record| self.runtime(&record.id).is_none())
            .collect())
    }

    /// Run the carrier lookup for a finished session on operator request.
    ///
    /// This is how a `stopped` session, which skips the lookup phase, gets
    /// carriers. The stored summary is updated with the lookup counts.
    pub async fn lookup_carriers(&self, session_id: &SessionId) -> Result<SessionSummary> {
        if self.runtime(session_id).is_some() {
            return Err(ScrapeError::SessionActive(session_id.clone()));
        }

        let record = self.record(session_id).await?;
        if !matches!(
            record.status,
            SessionStatus::Stopped | SessionStatus::Completed
        ) {
            return Err(ScrapeError::InvalidState {
                session_id: session_id.clone(),
                status: record.status,
                action: "look up carriers for",
            });
        }

        tracing::info!(session_id = %session_id, "Identifying carriers on request");
        let tally = identify_session_carriers(
            &self.services,
            session_id,
            record.config.simultaneous_lookups,
        )
        .await?;

        let mut summary = match record.summary_as::<SessionSummary>()? {
            Some(summary) => summary,
            None => self.summary_from_record(&record, Vec::new()).await?,
        };
        summary.lookup_performed = true;
        summary.resolved_carriers = tally.resolved;
        summary.failed_lookups = tally.failed;
        sessions::save_summary(&self.services.pool, session_id, &summary).await?;

        tracing::info!(
            session_id = %session_id,
            "Carrier lookup finished: {} of {} numbers resolved, {} failed",
            tally.resolved,
            tally.numbers,
            tally.failed
        );
        Ok(summary)
    }

    async fn launch(&self, session_id: SessionId, plan: RunPlan) -> Result<SessionHandle> {
        sessions::update_status(
            &self.services.pool,
            &session_id,
            SessionStatus::Running,
            None,
        )
        .await?;
        let record = self.record(&session_id).await?;

        let runtime = Arc::new(SessionRuntime::new(
            session_id.clone(),
            record.total_towns,
            record.started_at,
        ));
        let events = runtime.events.subscribe();
        let controller = runtime.controller.clone();
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), runtime.clone());

        let coordinator = Coordinator::new(
            self.services.clone(),
            runtime,
            plan,
            record.started_at,
        );
        let live = self.live.clone();
        let task_session_id = session_id.clone();
        let task = tokio::spawn(async move {
            let outcome = coordinator.run().await;
            live.lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&task_session_id);
            outcome
        });

        Ok(SessionHandle::new(session_id, events, controller, task))
    }

    async fn stop_detached(&self, record: &SessionRecord) -> Result<()> {
        let pool = &self.services.pool;
        let failed_towns = match checkpoint::load(pool, &record.id).await {
            Ok(saved) => saved.map(|c| c.batch.failed_towns).unwrap_or_default(),
            Err(e) => {
                tracing::warn!(session_id = %record.id, "Ignoring unreadable checkpoint: {}", e);
                Vec::new()
            }
        };

        let summary = self.summary_from_record(record, failed_towns).await?;
        sessions::save_summary(pool, &record.id, &summary).await?;
        sessions::update_status(pool, &record.id, SessionStatus::Stopped, None).await?;
        checkpoints::delete_checkpoint(pool, &record.id).await?;
        discard_scrape_retries(pool, &record.id).await;

        tracing::info!(
            session_id = %record.id,
            "Stopped {} session with {} businesses",
            record.status,
            summary.business_count
        );
        Ok(())
    }

    async fn summary_from_record(
        &self,
        record: &SessionRecord,
        failed_towns: Vec<String>,
    ) -> Result<SessionSummary> {
        let stored = businesses::count_businesses(&self.services.pool, &record.id).await?;
        #[allow(clippy::cast_precision_loss)]
        let duration_secs = record.started_at.map_or(0.0, |started| {
            let ended = record.completed_at.unwrap_or_else(Utc::now);
            (ended - started).num_milliseconds().max(0) as f64 / 1000.0
        });
        let mut summary = SessionSummary {
            town_count: record.total_towns,
            completed_towns: record.completed_towns,
            failed_towns,
            business_count: usize::try_from(stored).unwrap_or(usize::MAX),
            duration_secs,
            ..SessionSummary::default()
        };
        summary.finish_averages();
        Ok(summary)
    }

    async fn record(&self, session_id: &SessionId) -> Result<SessionRecord> {
        sessions::get_session(&self.services.pool, session_id)
            .await?
            .ok_or_else(|| ScrapeError::SessionNotFound(session_id.clone()))
    }

    fn runtime(&self, session_id: &SessionId) -> Option<Arc<SessionRuntime>> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .cloned()
    }
}
