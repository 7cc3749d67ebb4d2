//! Browser workers.
//!
//! A worker owns at most one browser session. It starts the browser lazily
//! when a town arrives, runs the town's industries concurrently against it and,
//! when configured to, tears it down before taking the next town.

use futures::stream::{self, StreamExt};
use leadscrape_browser::{BrowserError, BrowserLauncher, RawListing, SearchSession};
use leadscrape_core::{BusinessRecord, ScrapingConfig};
use leadscrape_db::retry_queue::RetryKind;
use leadscrape_lookup::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    InitializingBrowser,
    ProcessingTown,
    ClosingBrowser,
    /// The browser failed to start for the last town
    Error,
}

/// Tunables shared by all workers of a session.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    /// Industry scrapes run at once against one browser
    pub simultaneous_industries: usize,
    /// Attempts per industry for transient navigation failures
    pub max_industry_attempts: u32,
    /// Backoff between those attempts
    pub backoff: RetryPolicy,
    /// Close the browser after every town
    pub teardown_browser_per_town: bool,
}

impl WorkerOptions {
    pub fn new(simultaneous_industries: u8, scraping: &ScrapingConfig, backoff: RetryPolicy) -> Self {
        Self {
            simultaneous_industries: usize::from(simultaneous_industries.max(1)),
            max_industry_attempts: scraping.max_industry_attempts.max(1),
            backoff,
            teardown_browser_per_town: scraping.teardown_browser_per_town,
        }
    }
}

/// Result of one industry scrape.
#[derive(Debug, Clone)]
pub struct IndustryReport {
    pub industry: String,
    pub records: usize,
    pub elapsed: Duration,
    pub attempts: u32,
}

/// An industry that failed after its attempts ran out.
#[derive(Debug, Clone)]
pub struct IndustryFailure {
    pub industry: String,
    pub kind: RetryKind,
    pub error: String,
    pub attempts: u32,
    pub elapsed: Duration,
}

/// Everything a worker produced for one town.
#[derive(Debug, Clone)]
pub struct TownOutcome {
    pub town: String,
    pub businesses: Vec<BusinessRecord>,
    pub reports: Vec<IndustryReport>,
    pub industry_errors: Vec<IndustryFailure>,
    pub duration: Duration,
}

impl TownOutcome {
    /// At least one industry finished. A town where every industry failed
    /// produced nothing and counts as failed.
    pub fn succeeded(&self) -> bool {
        !self.reports.is_empty() || self.industry_errors.is_empty()
    }
}

pub struct BrowserWorker {
    id: usize,
    launcher: Arc<dyn BrowserLauncher>,
    session: Option<Arc<dyn SearchSession>>,
    state: WorkerState,
    options: WorkerOptions,
}

impl BrowserWorker {
    pub fn new(id: usize, launcher: Arc<dyn BrowserLauncher>, options: WorkerOptions) -> Self {
        Self {
            id,
            launcher,
            session: None,
            state: WorkerState::Idle,
            options,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Scrape every industry of `town`.
    ///
    /// Industry failures are collected in the outcome. The only error
    /// returned is a browser that would not start, which the caller treats
    /// as a town-level failure.
    pub async fn process_town(
        &mut self,
        town: &str,
        industries: &[String],
    ) -> Result<TownOutcome, BrowserError> {
        let started = Instant::now();
        let session = self.ensure_session().await?;

        self.state = WorkerState::ProcessingTown;
        tracing::debug!(worker = self.id, town = %town, "Processing town");

        let options = &self.options;
        let session = session.as_ref();
        let results: Vec<Result<(Vec<BusinessRecord>, IndustryReport), IndustryFailure>> =
            stream::iter(industries.iter().cloned())
                .map(|industry| async move {
                    scrape_industry(session, town, &industry, options).await
                })
                .buffer_unordered(options.simultaneous_industries)
                .collect()
                .await;

        let mut outcome = TownOutcome {
            town: town.to_string(),
            businesses: Vec::new(),
            reports: Vec::new(),
            industry_errors: Vec::new(),
            duration: Duration::ZERO,
        };
        for result in results {
            match result {
                Ok((records, report)) => {
                    outcome.businesses.extend(records);
                    outcome.reports.push(report);
                }
                Err(failure) => {
                    tracing::debug!(
                        worker = self.id,
                        town = %town,
                        industry = %failure.industry,
                        "Industry failed after {} attempts: {}",
                        failure.attempts,
                        failure.error
                    );
                    outcome.industry_errors.push(failure);
                }
            }
        }

        if self.options.teardown_browser_per_town {
            self.close_browser().await;
        } else {
            self.state = WorkerState::Idle;
        }

        outcome.duration = started.elapsed();
        Ok(outcome)
    }

    /// Close the browser if one is open.
    pub async fn shutdown(&mut self) {
        self.close_browser().await;
    }

    async fn ensure_session(&mut self) -> Result<Arc<dyn SearchSession>, BrowserError> {
        if let Some(session) = &self.session {
            return Ok(session.clone());
        }

        self.state = WorkerState::InitializingBrowser;
        match self.launcher.launch().await {
            Ok(session) => {
                self.session = Some(session.clone());
                Ok(session)
            }
            Err(e) => {
                tracing::error!(worker = self.id, "Browser failed to start: {}", e);
                self.state = WorkerState::Error;
                Err(e)
            }
        }
    }

    async fn close_browser(&mut self) {
        if let Some(session) = self.session.take() {
            self.state = WorkerState::ClosingBrowser;
            if let Err(e) = session.close().await {
                tracing::warn!(worker = self.id, "Failed to close browser: {}", e);
            }
        }
        self.state = WorkerState::Idle;
    }
}

async fn scrape_industry(
    session: &dyn SearchSession,
    town: &str,
    industry: &str,
    options: &WorkerOptions,
) -> Result<(Vec<BusinessRecord>, IndustryReport), IndustryFailure> {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match session.search(town, industry).await {
            Ok(listings) => {
                let records: Vec<BusinessRecord> = listings
                    .into_iter()
                    .map(|listing| to_record(listing, town, industry))
                    .collect();
                tracing::debug!(
                    town = %town,
                    industry = %industry,
                    "Extracted {} listings",
                    records.len()
                );
                let report = IndustryReport {
                    industry: industry.to_string(),
                    records: records.len(),
                    elapsed: started.elapsed(),
                    attempts: attempt,
                };
                return Ok((records, report));
            }
            Err(e) if e.is_transient() && attempt < options.max_industry_attempts => {
                let delay = options.backoff.delay_for(attempt);
                tracing::debug!(
                    town = %town,
                    industry = %industry,
                    "Search failed on attempt {}/{}, retrying in {:?}: {}",
                    attempt,
                    options.max_industry_attempts,
                    delay,
                    e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                let kind = if e.is_navigation() {
                    RetryKind::Navigation
                } else {
                    RetryKind::Extraction
                };
                return Err(IndustryFailure {
                    industry: industry.to_string(),
                    kind,
                    error: e.to_string(),
                    attempts: attempt,
                    elapsed: started.elapsed(),
                });
            }
        }
    }
}

fn to_record(listing: RawListing, town: &str, industry: &str) -> BusinessRecord {
    let mut record = BusinessRecord::new(listing.name, town, industry);
    record.phone = listing.phone;
    record.address = listing.address;
    record.category = listing.category;
    record.map_url = listing.map_url;
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    #[derive(Default)]
    struct Script {
        launches: AtomicUsize,
        closes: AtomicUsize,
        fail_launch: bool,
        /// industry -> errors returned before succeeding
        failures: Mutex<HashMap<String, Vec<BrowserError>>>,
        searches: AtomicUsize,
    }

    struct FakeLauncher(Arc<Script>);
    struct FakeSession(Arc<Script>);

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> leadscrape_browser::Result<Arc<dyn SearchSession>> {
            self.0.launches.fetch_add(1, Ordering::SeqCst);
            if self.0.fail_launch {
                return Err(BrowserError::Launch("no chrome".into()));
            }
            Ok(Arc::new(FakeSession(self.0.clone())))
        }
    }

    #[async_trait]
    impl SearchSession for FakeSession {
        async fn search(
            &self,
            town: &str,
            industry: &str,
        ) -> leadscrape_browser::Result<Vec<RawListing>> {
            self.0.searches.fetch_add(1, Ordering::SeqCst);
            let pending = self
                .0
                .failures
                .lock()
                .expect("lock")
                .get_mut(industry)
                .and_then(|errors| (!errors.is_empty()).then(|| errors.remove(0)));
            if let Some(err) = pending {
                return Err(err);
            }
            Ok(vec![RawListing {
                name: format!("{industry} of {town}"),
                phone: Some("0111234567".into()),
                address: None,
                category: Some(industry.to_string()),
                map_url: None,
            }])
        }

        async fn close(&self) -> leadscrape_browser::Result<()> {
            self.0.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn options(teardown: bool) -> WorkerOptions {
        WorkerOptions {
            simultaneous_industries: 2,
            max_industry_attempts: 2,
            backoff: RetryPolicy::new(2, Duration::from_secs(1), Duration::from_secs(30)),
            teardown_browser_per_town: teardown,
        }
    }

    fn industries() -> Vec<String> {
        vec!["Pharmacy".into(), "Cafe".into(), "Bakery".into()]
    }

    #[tokio::test(start_paused = true)]
    async fn test_process_town_tags_records() {
        let script = Arc::new(Script::default());
        let mut worker = BrowserWorker::new(0, Arc::new(FakeLauncher(script.clone())), options(true));

        let outcome = worker
            .process_town("Alpha", &industries())
            .await
            .expect("town processed");

        assert_eq!(outcome.businesses.len(), 3);
        assert!(outcome
            .businesses
            .iter()
            .all(|b| b.town == "Alpha" && b.name.ends_with("of Alpha")));
        assert!(outcome.industry_errors.is_empty());
        assert!(outcome.succeeded());
        assert_eq!(script.launches.load(Ordering::SeqCst), 1);
        assert_eq!(script.closes.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_industry_failure_does_not_abort_siblings() {
        let script = Arc::new(Script::default());
        script.failures.lock().expect("lock").insert(
            "Cafe".into(),
            vec![
                BrowserError::Timeout("slow".into()),
                BrowserError::Timeout("slow".into()),
            ],
        );
        script
            .failures
            .lock()
            .expect("lock")
            .insert("Bakery".into(), vec![BrowserError::Extraction("empty".into())]);
        let mut worker = BrowserWorker::new(0, Arc::new(FakeLauncher(script.clone())), options(true));

        let outcome = worker
            .process_town("Alpha", &industries())
            .await
            .expect("town processed");

        assert_eq!(outcome.businesses.len(), 1);
        assert_eq!(outcome.industry_errors.len(), 2);
        let cafe = outcome
            .industry_errors
            .iter()
            .find(|f| f.industry == "Cafe")
            .expect("cafe failure");
        assert_eq!(cafe.kind, RetryKind::Navigation);
        assert_eq!(cafe.attempts, 2);
        let bakery = outcome
            .industry_errors
            .iter()
            .find(|f| f.industry == "Bakery")
            .expect("bakery failure");
        assert_eq!(bakery.kind, RetryKind::Extraction);
        assert_eq!(bakery.attempts, 1);
        // 3 industries, one timeout retried once
        assert_eq!(script.searches.load(Ordering::SeqCst), 4);
        assert!(outcome.succeeded());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_recovers_in_place() {
        let script = Arc::new(Script::default());
        script.failures.lock().expect("lock").insert(
            "Pharmacy".into(),
            vec![BrowserError::NavigationError("reset".into())],
        );
        let mut worker = BrowserWorker::new(0, Arc::new(FakeLauncher(script.clone())), options(true));

        let outcome = worker
            .process_town("Beta", &["Pharmacy".to_string()])
            .await
            .expect("town processed");

        assert_eq!(outcome.businesses.len(), 1);
        assert_eq!(outcome.reports[0].attempts, 2);
    }

    #[tokio::test]
    async fn test_launch_failure_is_worker_fatal() {
        let script = Arc::new(Script {
            fail_launch: true,
            ..Script::default()
        });
        let mut worker = BrowserWorker::new(3, Arc::new(FakeLauncher(script.clone())), options(true));

        let err = worker
            .process_town("Gamma", &industries())
            .await
            .expect_err("launch fails");
        assert!(matches!(err, BrowserError::Launch(_)));
        assert_eq!(worker.state(), WorkerState::Error);
        assert_eq!(script.searches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_browser_reused_without_teardown() {
        let script = Arc::new(Script::default());
        let mut worker = BrowserWorker::new(0, Arc::new(FakeLauncher(script.clone())), options(false));

        worker.process_town("Alpha", &industries()).await.expect("alpha");
        worker.process_town("Beta", &industries()).await.expect("beta");
        assert_eq!(script.launches.load(Ordering::SeqCst), 1);
        assert_eq!(script.closes.load(Ordering::SeqCst), 0);

        worker.shutdown().await;
        assert_eq!(script.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_town_with_every_industry_failed() {
        let script = Arc::new(Script::default());
        script
            .failures
            .lock()
            .expect("lock")
            .insert("Cafe".into(), vec![BrowserError::Extraction("blank".into())]);
        let mut worker = BrowserWorker::new(0, Arc::new(FakeLauncher(script)), options(true));

        let outcome = worker
            .process_town("Delta", &["Cafe".to_string()])
            .await
            .expect("town processed");
        assert!(!outcome.succeeded());
    }
}
