//! The run loop of one session.
//!
//! The coordinator is the only writer of the town queue, the stored records
//! and the checkpoint. Workers receive one job at a time over their own
//! channel and report back over a shared one; the coordinator persists the
//! result, publishes progress and hands that worker its next job unless a
//! pause or stop was requested.

use crate::checkpoint::{self, BatchState, PairFailure, SessionCheckpoint};
use crate::error::{Result, ScrapeError};
use crate::events::{
    CompletionReport, LogEntry, LogLevel, ProgressTracker, ScrapeEvent, SessionSummary,
};
use crate::session::{ControlSignal, SessionOutcome, SessionRuntime};
use crate::worker::{BrowserWorker, TownOutcome, WorkerOptions};
use chrono::{DateTime, Utc};
use leadscrape_browser::{BrowserError, BrowserLauncher};
use leadscrape_core::{Carrier, ScrapeConfig, ScrapingConfig, SessionId, SessionStatus};
use leadscrape_db::{
    businesses, checkpoints, metrics, retry_queue, sessions, MetricKind, NewRetryItem, RetryItem,
    RetryKind,
};
use leadscrape_lookup::{ProviderLookupService, RetryPolicy};
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Sqlite};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Shared dependencies of every session run.
#[derive(Clone)]
pub(crate) struct Services {
    pub pool: Pool<Sqlite>,
    pub launcher: Arc<dyn BrowserLauncher>,
    pub lookup: Arc<ProviderLookupService>,
    pub scraping: ScrapingConfig,
    pub backoff: RetryPolicy,
}

/// Where a run starts from.
pub(crate) struct RunPlan {
    pub config: ScrapeConfig,
    pub batch: BatchState,
    pub failures: Vec<PairFailure>,
    /// Dequeued retry items, attempted before the remaining towns
    pub retries: Vec<RetryItem>,
    /// Records already stored by earlier runs
    pub business_count: usize,
}

impl RunPlan {
    pub fn fresh(config: ScrapeConfig) -> Self {
        Self {
            batch: BatchState::new(config.towns.clone()),
            config,
            failures: Vec::new(),
            retries: Vec::new(),
            business_count: 0,
        }
    }

    pub fn resumed(
        config: ScrapeConfig,
        saved: Option<SessionCheckpoint>,
        retries: Vec<RetryItem>,
        business_count: u64,
    ) -> Self {
        let (batch, failures) = match saved {
            Some(saved) => (saved.batch, saved.failures),
            None => (BatchState::new(config.towns.clone()), Vec::new()),
        };
        Self {
            config,
            batch,
            failures,
            retries,
            business_count: usize::try_from(business_count).unwrap_or(usize::MAX),
        }
    }
}

/// Payload of a `lookup` retry item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LookupRetry {
    pub phone: String,
}

/// Counts from one carrier lookup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupTally {
    /// Distinct phone strings looked up
    pub numbers: usize,
    pub resolved: usize,
    pub failed: usize,
}

enum JobKind {
    Town,
    Retry(RetryItem),
}

struct Job {
    town: String,
    industries: Vec<String>,
    kind: JobKind,
}

struct WorkerReport {
    worker: usize,
    job: Job,
    result: std::result::Result<TownOutcome, BrowserError>,
}

pub(crate) struct Coordinator {
    services: Services,
    runtime: Arc<SessionRuntime>,
    session_id: SessionId,
    config: ScrapeConfig,
    batch: BatchState,
    failures: Vec<PairFailure>,
    queue: VecDeque<Job>,
    tracker: ProgressTracker,
    current_industry: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

impl Coordinator {
    pub fn new(
        services: Services,
        runtime: Arc<SessionRuntime>,
        plan: RunPlan,
        started_at: Option<DateTime<Utc>>,
    ) -> Self {
        let session_id = runtime.session_id.clone();
        let total = u32::try_from(plan.config.towns.len()).unwrap_or(u32::MAX);
        let mut tracker = ProgressTracker::new(
            session_id.clone(),
            total,
            usize::from(plan.config.simultaneous_towns),
        );
        tracker.restore(
            u32::try_from(plan.batch.completed_towns.len()).unwrap_or(u32::MAX),
            u32::try_from(plan.batch.failed_towns.len()).unwrap_or(u32::MAX),
            plan.business_count,
        );

        let mut queue = VecDeque::new();
        for item in plan.retries {
            match item.payload_as::<PairFailure>() {
                Ok(pair) => queue.push_back(Job {
                    town: pair.town,
                    industries: vec![pair.industry],
                    kind: JobKind::Retry(item),
                }),
                Err(e) => tracing::warn!(
                    session_id = %session_id,
                    "Dropping unreadable retry item {}: {}",
                    item.id,
                    e
                ),
            }
        }
        for town in &plan.batch.pending_towns {
            queue.push_back(Job {
                town: town.clone(),
                industries: plan.config.industries.clone(),
                kind: JobKind::Town,
            });
        }

        Self {
            services,
            runtime,
            session_id,
            config: plan.config,
            batch: plan.batch,
            failures: plan.failures,
            queue,
            tracker,
            current_industry: None,
            started_at,
        }
    }

    /// Drive the session until it is finished or paused.
    ///
    /// A session that cannot even record its failure is reported as an
    /// error; every other failure ends in a `failed` completion report.
    pub async fn run(self) -> Result<SessionOutcome> {
        let pool = self.services.pool.clone();
        let session_id = self.session_id.clone();

        let outcome = self.run_to_end().await;
        if let Err(e) = &outcome {
            tracing::error!(session_id = %session_id, "Session aborted: {}", e);
            let message = e.to_string();
            if let Err(update) =
                sessions::update_status(&pool, &session_id, SessionStatus::Failed, Some(&message))
                    .await
            {
                tracing::error!(session_id = %session_id, "Failed to mark session failed: {}", update);
            }
        }
        outcome
    }

    async fn run_to_end(mut self) -> Result<SessionOutcome> {
        let retries = self
            .queue
            .iter()
            .filter(|job| matches!(job.kind, JobKind::Retry(_)))
            .count();
        self.runtime.events.info(format!(
            "Session started: {} of {} towns pending, {} industries, {} retries queued",
            self.batch.pending_towns.len(),
            self.config.towns.len(),
            self.config.industries.len(),
            retries
        ));

        if let Some(err) = self.drive_workers().await {
            let message = err.to_string();
            self.log(LogEntry::new(
                LogLevel::Error,
                format!("Session failed: {message}"),
            ));
            return self.finalize(SessionStatus::Failed, Some(message), None).await;
        }

        match self.runtime.controller.signal() {
            ControlSignal::Pause if !self.queue.is_empty() => return self.suspend().await,
            ControlSignal::Stop => return self.finalize(SessionStatus::Stopped, None, None).await,
            _ => {}
        }

        if self.tracker.completed_towns() == 0 {
            let message = format!("no town succeeded out of {}", self.config.towns.len());
            self.log(LogEntry::new(LogLevel::Error, format!("Session failed: {message}")));
            return self.finalize(SessionStatus::Failed, Some(message), None).await;
        }

        let tally = if self.config.lookup_enabled {
            self.runtime
                .events
                .info("Extraction finished, identifying carriers");
            match identify_session_carriers(
                &self.services,
                &self.session_id,
                self.config.simultaneous_lookups,
            )
            .await
            {
                Ok(tally) => {
                    self.runtime.events.info(format!(
                        "Carrier lookup finished: {} of {} numbers resolved, {} failed",
                        tally.resolved, tally.numbers, tally.failed
                    ));
                    Some(tally)
                }
                Err(e) => {
                    let message = e.to_string();
                    self.log(LogEntry::new(
                        LogLevel::Error,
                        format!("Carrier lookup failed: {message}"),
                    ));
                    return self.finalize(SessionStatus::Failed, Some(message), None).await;
                }
            }
        } else {
            None
        };

        self.finalize(SessionStatus::Completed, None, tally).await
    }

    /// Run the worker pool until the queue drains, a pause or stop is
    /// requested, or storage fails. Returns the storage error, if any.
    async fn drive_workers(&mut self) -> Option<ScrapeError> {
        let worker_count = usize::from(self.config.simultaneous_towns.max(1)).min(self.queue.len());
        if worker_count == 0 {
            return None;
        }

        let options = WorkerOptions::new(
            self.config.simultaneous_industries,
            &self.services.scraping,
            self.services.backoff,
        );
        let (report_tx, mut report_rx) = mpsc::channel(worker_count);
        let mut senders = Vec::with_capacity(worker_count);
        let mut handles = Vec::with_capacity(worker_count);
        for id in 0..worker_count {
            let (job_tx, job_rx) = mpsc::channel(1);
            let worker = BrowserWorker::new(id, self.services.launcher.clone(), options.clone());
            handles.push(tokio::spawn(run_worker(worker, job_rx, report_tx.clone())));
            senders.push(Some(job_tx));
        }
        drop(report_tx);
        tracing::debug!(session_id = %self.session_id, workers = worker_count, "Worker pool started");

        let mut in_flight = 0usize;
        for slot in &mut senders {
            if self.dispatch(slot).await {
                in_flight += 1;
            }
        }

        let mut fatal = None;
        while in_flight > 0 {
            let Some(report) = report_rx.recv().await else {
                break;
            };
            in_flight -= 1;
            let worker = report.worker;

            if let Err(e) = self.handle_report(report).await {
                tracing::error!(session_id = %self.session_id, "Storage failure: {}", e);
                fatal.get_or_insert(e);
            }

            let keep_going =
                fatal.is_none() && self.runtime.controller.signal() == ControlSignal::Run;
            match senders.get_mut(worker) {
                Some(slot) if keep_going => {
                    if self.dispatch(slot).await {
                        in_flight += 1;
                    }
                }
                Some(slot) => *slot = None,
                None => {}
            }
        }

        drop(senders);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!(session_id = %self.session_id, "Worker task ended abnormally: {}", e);
            }
        }
        fatal
    }

    /// Hand the next queued job to a worker. An idle worker with nothing
    /// left to do has its channel closed so it can shut its browser down.
    async fn dispatch(&mut self, slot: &mut Option<mpsc::Sender<Job>>) -> bool {
        let Some(tx) = slot.as_ref() else {
            return false;
        };
        let Some(job) = self.queue.pop_front() else {
            *slot = None;
            return false;
        };
        match tx.send(job).await {
            Ok(()) => true,
            Err(mpsc::error::SendError(job)) => {
                self.queue.push_front(job);
                *slot = None;
                false
            }
        }
    }

    async fn handle_report(&mut self, report: WorkerReport) -> Result<()> {
        let Job {
            town,
            industries,
            kind,
        } = report.job;

        match (kind, report.result) {
            (JobKind::Town, Ok(outcome)) => self.finish_town(outcome).await,
            (JobKind::Town, Err(e)) => self.town_launch_failed(town, industries, &e).await,
            (JobKind::Retry(item), Ok(outcome)) => self.finish_retry(item, outcome).await,
            (JobKind::Retry(item), Err(e)) => {
                let industry = industries.first().cloned().unwrap_or_default();
                self.log(
                    LogEntry::new(
                        LogLevel::Warn,
                        format!("Browser failed to start for retry of {industry} in {town}: {e}"),
                    )
                    .with_town(&town)
                    .with_industry(&industry),
                );
                let next = retry_at(self.services.backoff.delay_for(item.attempts.saturating_add(1)));
                retry_queue::requeue_after_failure(&self.services.pool, &item, next).await?;
                Ok(())
            }
        }
    }

    async fn finish_town(&mut self, outcome: TownOutcome) -> Result<()> {
        let town = outcome.town.clone();
        businesses::insert_businesses(&self.services.pool, &self.session_id, &outcome.businesses)
            .await?;
        self.record_industry_metrics(&outcome).await;

        for failure in &outcome.industry_errors {
            let pair = PairFailure {
                town: town.clone(),
                industry: failure.industry.clone(),
                kind: failure.kind,
                error: failure.error.clone(),
            };
            let item = NewRetryItem::with_payload(
                self.session_id.clone(),
                failure.kind,
                &pair,
                failure.attempts.max(1),
                retry_at(self.services.backoff.delay_for(failure.attempts)),
            )?;
            retry_queue::enqueue_retry(&self.services.pool, &item).await?;
            self.log(
                LogEntry::new(
                    LogLevel::Warn,
                    format!(
                        "{} failed in {} after {} attempts: {}",
                        failure.industry, town, failure.attempts, failure.error
                    ),
                )
                .with_town(&town)
                .with_industry(&failure.industry),
            );
            self.failures.push(pair);
        }

        let succeeded = outcome.succeeded();
        self.batch.pending_towns.retain(|t| t != &town);
        if succeeded {
            self.batch.completed_towns.push(town.clone());
        } else {
            self.batch.failed_towns.push(town.clone());
        }
        self.tracker.record_town(
            &town,
            succeeded,
            outcome.businesses.len(),
            Some(outcome.duration),
        );
        self.current_industry = outcome.reports.last().map(|r| r.industry.clone());
        self.save_checkpoint(&town).await?;

        let entry = if succeeded {
            LogEntry::new(
                LogLevel::Info,
                format!(
                    "Finished {}: {} businesses, {} of {} industries failed",
                    town,
                    outcome.businesses.len(),
                    outcome.industry_errors.len(),
                    outcome.reports.len() + outcome.industry_errors.len()
                ),
            )
        } else {
            LogEntry::new(
                LogLevel::Error,
                format!("Every industry failed in {town}, town marked failed"),
            )
        };
        self.log(entry.with_town(&town));
        self.publish_progress().await
    }

    async fn town_launch_failed(
        &mut self,
        town: String,
        industries: Vec<String>,
        error: &BrowserError,
    ) -> Result<()> {
        let attempts = {
            let counter = self.batch.town_attempts.entry(town.clone()).or_insert(0);
            *counter += 1;
            *counter
        };
        let max_attempts = self.services.scraping.max_town_attempts.max(1);

        if attempts < max_attempts {
            self.log(
                LogEntry::new(
                    LogLevel::Warn,
                    format!(
                        "Browser failed to start for {town} (attempt {attempts}/{max_attempts}), requeued: {error}"
                    ),
                )
                .with_town(&town),
            );
            self.queue.push_back(Job {
                town: town.clone(),
                industries,
                kind: JobKind::Town,
            });
            return self.save_checkpoint(&town).await;
        }

        self.log(
            LogEntry::new(
                LogLevel::Error,
                format!("Giving up on {town} after {attempts} browser start failures: {error}"),
            )
            .with_town(&town),
        );
        self.batch.pending_towns.retain(|t| t != &town);
        self.batch.failed_towns.push(town.clone());
        self.tracker.record_town(&town, false, 0, None);
        self.current_industry = None;
        self.save_checkpoint(&town).await?;
        self.publish_progress().await
    }

    async fn finish_retry(&mut self, item: RetryItem, outcome: TownOutcome) -> Result<()> {
        let town = outcome.town.clone();
        businesses::insert_businesses(&self.services.pool, &self.session_id, &outcome.businesses)
            .await?;
        self.record_industry_metrics(&outcome).await;
        self.tracker.add_businesses(outcome.businesses.len());

        if let Some(failure) = outcome.industry_errors.first() {
            let next = retry_at(self.services.backoff.delay_for(item.attempts.saturating_add(1)));
            retry_queue::requeue_after_failure(&self.services.pool, &item, next).await?;
            self.log(
                LogEntry::new(
                    LogLevel::Warn,
                    format!(
                        "Retry of {} in {} failed again: {}",
                        failure.industry, town, failure.error
                    ),
                )
                .with_town(&town)
                .with_industry(&failure.industry),
            );
        } else {
            for report in &outcome.reports {
                self.failures
                    .retain(|f| !(f.town == town && f.industry == report.industry));
                self.log(
                    LogEntry::new(
                        LogLevel::Info,
                        format!(
                            "Recovered {} in {}: {} businesses",
                            report.industry, town, report.records
                        ),
                    )
                    .with_town(&town)
                    .with_industry(&report.industry),
                );
            }
            if outcome.succeeded() && self.batch.failed_towns.contains(&town) {
                self.batch.failed_towns.retain(|t| t != &town);
                self.batch.completed_towns.push(town.clone());
                self.tracker.recover_town();
                self.log(
                    LogEntry::new(LogLevel::Info, format!("{town} recovered, town marked completed"))
                        .with_town(&town),
                );
            }
        }

        self.save_checkpoint(&town).await?;
        self.publish_progress().await
    }

    async fn record_industry_metrics(&self, outcome: &TownOutcome) {
        for report in &outcome.reports {
            self.record_metric(
                MetricKind::Navigation,
                "industry_ms",
                report.elapsed.as_secs_f64() * 1000.0,
            )
            .await;
            self.record_metric(MetricKind::Extraction, "records", count_value(report.records))
                .await;
        }
        for failure in &outcome.industry_errors {
            self.record_metric(
                MetricKind::Navigation,
                "industry_ms",
                failure.elapsed.as_secs_f64() * 1000.0,
            )
            .await;
        }
    }

    async fn record_metric(&self, kind: MetricKind, name: &str, value: f64) {
        if let Err(e) =
            metrics::record_metric(&self.services.pool, &self.session_id, kind, name, value).await
        {
            tracing::warn!(session_id = %self.session_id, "Failed to record metric {}: {}", name, e);
        }
    }

    fn current_checkpoint(&self, town: Option<&str>) -> SessionCheckpoint {
        SessionCheckpoint {
            batch: self.batch.clone(),
            failures: self.failures.clone(),
            current_town: town.map(ToString::to_string),
            current_industry: self.current_industry.clone(),
            processed_count: u32::try_from(self.tracker.business_count()).unwrap_or(u32::MAX),
        }
    }

    async fn save_checkpoint(&self, town: &str) -> Result<()> {
        checkpoint::save(
            &self.services.pool,
            &self.session_id,
            &self.current_checkpoint(Some(town)),
        )
        .await?;
        self.runtime
            .update(|s| s.last_checkpoint_at = Some(Utc::now()));
        Ok(())
    }

    async fn publish_progress(&self) -> Result<()> {
        let update = self.tracker.snapshot();
        sessions::update_progress(
            &self.services.pool,
            &self.session_id,
            update.completed_towns,
            update.failed_towns,
            u32::try_from(update.business_count).unwrap_or(u32::MAX),
        )
        .await?;
        self.runtime
            .events
            .emit(ScrapeEvent::Progress(update.clone()));
        self.runtime.update(|s| s.progress = Some(update));
        Ok(())
    }

    fn log(&self, entry: LogEntry) {
        self.runtime.events.log(entry);
    }

    /// Put dequeued retry items that were never attempted back in the queue.
    async fn restore_unsent_retries(&mut self) -> Result<()> {
        for job in self.queue.drain(..) {
            if let JobKind::Retry(item) = job.kind {
                retry_queue::enqueue_retry(
                    &self.services.pool,
                    &NewRetryItem {
                        session_id: item.session_id.clone(),
                        kind: item.kind,
                        payload: item.payload.clone(),
                        attempts: item.attempts,
                        next_retry_at: item.next_retry_at,
                    },
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn suspend(mut self) -> Result<SessionOutcome> {
        self.restore_unsent_retries().await?;
        let last_town = self.tracker.snapshot().last_town;
        checkpoint::save(
            &self.services.pool,
            &self.session_id,
            &self.current_checkpoint(last_town.as_deref()),
        )
        .await?;
        sessions::update_status(
            &self.services.pool,
            &self.session_id,
            SessionStatus::Paused,
            None,
        )
        .await?;

        self.runtime.update(|s| {
            s.status = SessionStatus::Paused;
            s.last_checkpoint_at = Some(Utc::now());
        });
        self.runtime.events.info(format!(
            "Session paused with {} towns remaining",
            self.batch.pending_towns.len()
        ));

        Ok(SessionOutcome::Paused {
            session_id: self.session_id.clone(),
            pending_towns: self.batch.pending_towns.clone(),
        })
    }

    async fn finalize(
        self,
        status: SessionStatus,
        error: Option<String>,
        tally: Option<LookupTally>,
    ) -> Result<SessionOutcome> {
        let pool = &self.services.pool;
        let records = match businesses::get_businesses(pool, &self.session_id).await {
            Ok(records) => Some(records),
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "Failed to read session records: {}", e);
                None
            }
        };
        let business_count = records
            .as_ref()
            .map_or_else(|| self.tracker.business_count(), Vec::len);

        #[allow(clippy::cast_precision_loss)]
        let duration_secs = self.started_at.map_or_else(
            || self.tracker.elapsed().as_secs_f64(),
            |at| (Utc::now() - at).num_milliseconds().max(0) as f64 / 1000.0,
        );
        let mut summary = SessionSummary {
            town_count: u32::try_from(self.config.towns.len()).unwrap_or(u32::MAX),
            completed_towns: self.tracker.completed_towns(),
            failed_towns: self.batch.failed_towns.clone(),
            business_count,
            duration_secs,
            businesses_per_town: 0.0,
            failed_industries: self.failures.len(),
            lookup_performed: tally.is_some(),
            resolved_carriers: tally.map_or(0, |t| t.resolved),
            failed_lookups: tally.map_or(0, |t| t.failed),
        };
        summary.finish_averages();

        if let Err(e) = sessions::update_progress(
            pool,
            &self.session_id,
            summary.completed_towns,
            self.tracker.failed_towns(),
            u32::try_from(business_count).unwrap_or(u32::MAX),
        )
        .await
        {
            tracing::warn!(session_id = %self.session_id, "Failed to store final counts: {}", e);
        }
        if let Err(e) = sessions::save_summary(pool, &self.session_id, &summary).await {
            tracing::warn!(session_id = %self.session_id, "Failed to store summary: {}", e);
        }
        sessions::update_status(pool, &self.session_id, status, error.as_deref()).await?;
        if let Err(e) = checkpoints::delete_checkpoint(pool, &self.session_id).await {
            tracing::warn!(session_id = %self.session_id, "Failed to delete checkpoint: {}", e);
        }
        discard_scrape_retries(pool, &self.session_id).await;

        self.runtime.update(|s| {
            s.status = status;
            s.error_message.clone_from(&error);
        });
        let message = format!(
            "Session {}: {} businesses from {} of {} towns in {:.1}s",
            status,
            summary.business_count,
            summary.completed_towns,
            summary.town_count,
            summary.duration_secs
        );
        let level = if status == SessionStatus::Failed {
            LogLevel::Error
        } else {
            LogLevel::Info
        };
        self.log(LogEntry::new(level, message));

        let report = CompletionReport {
            session_id: self.session_id.clone(),
            status,
            businesses: records.unwrap_or_default(),
            summary,
            error,
        };
        self.runtime
            .events
            .emit(ScrapeEvent::Complete(Box::new(report.clone())));
        Ok(SessionOutcome::Finished(Box::new(report)))
    }
}

async fn run_worker(
    mut worker: BrowserWorker,
    mut jobs: mpsc::Receiver<Job>,
    reports: mpsc::Sender<WorkerReport>,
) {
    while let Some(job) = jobs.recv().await {
        let result = worker.process_town(&job.town, &job.industries).await;
        let report = WorkerReport {
            worker: worker.id(),
            job,
            result,
        };
        if reports.send(report).await.is_err() {
            break;
        }
    }
    worker.shutdown().await;
    tracing::debug!(worker = worker.id(), "Worker finished");
}

/// Resolve carriers for every phone number stored for a session.
///
/// Due `lookup` retry items of the session are consumed, since every stored
/// number is looked up again; numbers that still fail are queued anew.
pub(crate) async fn identify_session_carriers(
    services: &Services,
    session_id: &SessionId,
    lanes: u8,
) -> Result<LookupTally> {
    let pool = &services.pool;
    let consumed = retry_queue::take_for_session(pool, session_id, &[RetryKind::Lookup]).await?;
    if !consumed.is_empty() {
        tracing::debug!(session_id = %session_id, "Consumed {} queued lookup retries", consumed.len());
    }

    let records = businesses::get_businesses(pool, session_id).await?;
    let phones: Vec<String> = records
        .iter()
        .filter_map(|r| r.phone.as_deref())
        .filter(|p| !p.trim().is_empty())
        .map(ToString::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let batch = services
        .lookup
        .identify_carrier_batch_in_lanes(&phones, usize::from(lanes.max(1)))
        .await;

    let carriers: HashMap<String, Carrier> = batch
        .matches
        .iter()
        .map(|(phone, found)| (phone.clone(), found.carrier.clone()))
        .collect();
    businesses::apply_carriers(pool, session_id, &carriers).await?;

    let policy = services.lookup.limiter().policy();
    for phone in &batch.failed {
        let item = NewRetryItem::with_payload(
            session_id.clone(),
            RetryKind::Lookup,
            &LookupRetry {
                phone: phone.clone(),
            },
            policy.max_attempts,
            retry_at(policy.max_delay),
        )?;
        retry_queue::enqueue_retry(pool, &item).await?;
    }

    let tally = LookupTally {
        numbers: phones.len(),
        resolved: batch.resolved_count(),
        failed: batch.failed.len(),
    };
    let unknown = tally
        .numbers
        .saturating_sub(tally.resolved + tally.failed);
    for (name, value) in [
        ("resolved", tally.resolved),
        ("unknown", unknown),
        ("failed", tally.failed),
    ] {
        if let Err(e) =
            metrics::record_metric(pool, session_id, MetricKind::Lookup, name, count_value(value))
                .await
        {
            tracing::warn!(session_id = %session_id, "Failed to record metric {}: {}", name, e);
        }
    }

    Ok(tally)
}

/// Drop the navigation and extraction retries of a session that can no
/// longer be resumed. Its failed pairs stay counted in the summary.
pub(crate) async fn discard_scrape_retries(pool: &Pool<Sqlite>, session_id: &SessionId) {
    match retry_queue::take_for_session(
        pool,
        session_id,
        &[RetryKind::Navigation, RetryKind::Extraction],
    )
    .await
    {
        Ok(items) if !items.is_empty() => {
            tracing::debug!(session_id = %session_id, "Discarded {} unused scrape retries", items.len());
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(session_id = %session_id, "Failed to discard scrape retries: {}", e);
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn count_value(count: usize) -> f64 {
    count as f64
}

fn retry_at(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}
