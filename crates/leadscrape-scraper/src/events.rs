//! Session event stream and progress accounting.
//!
//! Each session owns one [`EventBus`]. Only the session coordinator publishes,
//! so subscribers see progress in the order it happened; attaching or
//! dropping a receiver never affects emission.

use chrono::{DateTime, Utc};
use leadscrape_core::{BusinessRecord, SessionId, SessionStatus};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::Instant;

/// Log entries kept for status snapshots.
pub const RECENT_LOG_CAPACITY: usize = 15;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events published for a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScrapeEvent {
    Progress(ProgressUpdate),
    Log(LogEntry),
    Complete(Box<CompletionReport>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub session_id: SessionId,
    /// Towns finished, successfully or not
    pub processed_towns: u32,
    pub completed_towns: u32,
    pub failed_towns: u32,
    pub total_towns: u32,
    pub business_count: usize,
    /// Share of towns processed, in `[0, 100]`
    pub percentage: f64,
    pub elapsed_secs: f64,
    /// `None` until at least one town has finished in this run
    pub eta_secs: Option<f64>,
    pub last_town: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub town: Option<String>,
    pub industry: Option<String>,
}

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            level,
            message: message.into(),
            town: None,
            industry: None,
        }
    }

    #[must_use]
    pub fn with_town(mut self, town: impl Into<String>) -> Self {
        self.town = Some(town.into());
        self
    }

    #[must_use]
    pub fn with_industry(mut self, industry: impl Into<String>) -> Self {
        self.industry = Some(industry.into());
        self
    }
}

/// Totals reported when a session finishes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SessionSummary {
    pub town_count: u32,
    pub completed_towns: u32,
    pub failed_towns: Vec<String>,
    pub business_count: usize,
    pub duration_secs: f64,
    pub businesses_per_town: f64,
    pub failed_industries: usize,
    pub lookup_performed: bool,
    pub resolved_carriers: usize,
    pub failed_lookups: usize,
}

impl SessionSummary {
    /// Recompute the per-town average from the current counts.
    pub fn finish_averages(&mut self) {
        self.businesses_per_town = if self.completed_towns == 0 {
            0.0
        } else {
            self.business_count as f64 / f64::from(self.completed_towns)
        };
    }
}

/// Payload of the `complete` event.
#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub businesses: Vec<BusinessRecord>,
    pub summary: SessionSummary,
    /// Message of the error that failed the session
    pub error: Option<String>,
}

/// Bounded list of the most recent log entries.
#[derive(Debug, Clone)]
pub struct LogRing {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl LogRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, entry: LogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new(RECENT_LOG_CAPACITY)
    }
}

/// Broadcast channel plus the recent-log ring of one session.
#[derive(Debug)]
pub struct EventBus {
    tx: broadcast::Sender<ScrapeEvent>,
    recent: Mutex<LogRing>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            tx,
            recent: Mutex::new(LogRing::default()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScrapeEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn emit(&self, event: ScrapeEvent) {
        let _ = self.tx.send(event);
    }

    /// Record an operator-facing log line and publish it.
    pub fn log(&self, entry: LogEntry) {
        match entry.level {
            LogLevel::Info => tracing::info!(
                town = entry.town.as_deref(),
                industry = entry.industry.as_deref(),
                "{}",
                entry.message
            ),
            LogLevel::Warn => tracing::warn!(
                town = entry.town.as_deref(),
                industry = entry.industry.as_deref(),
                "{}",
                entry.message
            ),
            LogLevel::Error => tracing::error!(
                town = entry.town.as_deref(),
                industry = entry.industry.as_deref(),
                "{}",
                entry.message
            ),
        }
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.clone());
        self.emit(ScrapeEvent::Log(entry));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogEntry::new(LogLevel::Info, message));
    }

    pub fn recent_logs(&self) -> Vec<LogEntry> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Progress counters for one run of a session.
///
/// Counts carried over from a resumed checkpoint are included in the totals;
/// only towns finished in this run feed the ETA.
#[derive(Debug)]
pub struct ProgressTracker {
    session_id: SessionId,
    total_towns: u32,
    completed_towns: u32,
    failed_towns: u32,
    business_count: usize,
    workers: usize,
    started: Instant,
    town_time: Duration,
    towns_timed: u32,
    last_town: Option<String>,
}

impl ProgressTracker {
    pub fn new(session_id: SessionId, total_towns: u32, workers: usize) -> Self {
        Self {
            session_id,
            total_towns,
            completed_towns: 0,
            failed_towns: 0,
            business_count: 0,
            workers: workers.max(1),
            started: Instant::now(),
            town_time: Duration::ZERO,
            towns_timed: 0,
            last_town: None,
        }
    }

    /// Seed counts from an earlier run.
    pub fn restore(&mut self, completed_towns: u32, failed_towns: u32, business_count: usize) {
        self.completed_towns = completed_towns;
        self.failed_towns = failed_towns;
        self.business_count = business_count;
    }

    /// Count a finished town. `took` is `None` when the town never reached a
    /// browser, so it does not skew the mean town duration.
    pub fn record_town(
        &mut self,
        town: &str,
        succeeded: bool,
        businesses: usize,
        took: Option<Duration>,
    ) {
        if succeeded {
            self.completed_towns += 1;
        } else {
            self.failed_towns += 1;
        }
        self.business_count += businesses;
        if let Some(took) = took {
            self.town_time += took;
            self.towns_timed += 1;
        }
        self.last_town = Some(town.to_string());
    }

    /// Move one town from the failed count to the completed count, after a
    /// retried industry succeeded in a town that had failed.
    pub fn recover_town(&mut self) {
        if self.failed_towns > 0 {
            self.failed_towns -= 1;
            self.completed_towns += 1;
        }
    }

    /// Businesses found outside a town cycle, such as retried industries.
    pub fn add_businesses(&mut self, count: usize) {
        self.business_count += count;
    }

    pub fn completed_towns(&self) -> u32 {
        self.completed_towns
    }

    pub fn failed_towns(&self) -> u32 {
        self.failed_towns
    }

    pub fn business_count(&self) -> usize {
        self.business_count
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    fn processed(&self) -> u32 {
        (self.completed_towns + self.failed_towns).min(self.total_towns)
    }

    /// Mean town duration times the remaining towns, spread over the workers
    /// that can still be busy.
    pub fn eta(&self) -> Option<Duration> {
        if self.towns_timed == 0 {
            return None;
        }
        let remaining = self.total_towns.saturating_sub(self.processed());
        if remaining == 0 {
            return Some(Duration::ZERO);
        }
        let mean = self.town_time / self.towns_timed;
        let lanes = u32::try_from(self.workers)
            .unwrap_or(u32::MAX)
            .clamp(1, remaining);
        Some(mean * remaining / lanes)
    }

    pub fn snapshot(&self) -> ProgressUpdate {
        let processed = self.processed();
        let percentage = if self.total_towns == 0 {
            100.0
        } else {
            (f64::from(processed) / f64::from(self.total_towns) * 100.0).clamp(0.0, 100.0)
        };
        ProgressUpdate {
            session_id: self.session_id.clone(),
            processed_towns: processed,
            completed_towns: self.completed_towns,
            failed_towns: self.failed_towns,
            total_towns: self.total_towns,
            business_count: self.business_count,
            percentage,
            elapsed_secs: self.elapsed().as_secs_f64(),
            eta_secs: self.eta().map(|d| d.as_secs_f64()),
            last_town: self.last_town.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_ring_keeps_latest_entries() {
        let mut ring = LogRing::default();
        for i in 0..40 {
            ring.push(LogEntry::new(LogLevel::Info, format!("entry {i}")));
        }
        let entries = ring.entries();
        assert_eq!(entries.len(), RECENT_LOG_CAPACITY);
        assert_eq!(entries[0].message, "entry 25");
        assert_eq!(entries[RECENT_LOG_CAPACITY - 1].message, "entry 39");
    }

    #[tokio::test]
    async fn test_event_bus_publishes_logs() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.log(
            LogEntry::new(LogLevel::Warn, "Cafe failed")
                .with_town("Alpha")
                .with_industry("Cafe"),
        );

        match rx.recv().await.expect("event") {
            ScrapeEvent::Log(entry) => {
                assert_eq!(entry.level, LogLevel::Warn);
                assert_eq!(entry.town.as_deref(), Some("Alpha"));
                assert_eq!(entry.industry.as_deref(), Some("Cafe"));
            }
            other => panic!("expected log event, got {other:?}"),
        }
        assert_eq!(bus.recent_logs().len(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new();
        bus.info("nobody listening");
        assert_eq!(bus.recent_logs().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_progress_eta_uses_mean_town_duration() {
        let mut tracker = ProgressTracker::new(SessionId::generate(), 10, 2);
        assert!(tracker.eta().is_none());

        tracker.record_town("Alpha", true, 4, Some(Duration::from_secs(10)));
        tracker.record_town("Beta", true, 2, Some(Duration::from_secs(30)));

        // mean 20s, 8 towns left, 2 workers
        assert_eq!(tracker.eta(), Some(Duration::from_secs(80)));

        let update = tracker.snapshot();
        assert_eq!(update.processed_towns, 2);
        assert_eq!(update.business_count, 6);
        assert!((update.percentage - 20.0).abs() < 1e-9);
        assert_eq!(update.last_town.as_deref(), Some("Beta"));
    }

    #[test]
    fn test_progress_percentage_is_bounded() {
        let mut tracker = ProgressTracker::new(SessionId::generate(), 2, 5);
        tracker.restore(1, 1, 3);
        tracker.record_town("Gamma", false, 0, Some(Duration::from_secs(1)));

        let update = tracker.snapshot();
        assert_eq!(update.processed_towns, 2);
        assert!((update.percentage - 100.0).abs() < 1e-9);
        assert_eq!(update.eta_secs, Some(0.0));
    }

    #[test]
    fn test_recovered_town_moves_to_completed() {
        let mut tracker = ProgressTracker::new(SessionId::generate(), 3, 1);
        tracker.restore(0, 3, 0);

        tracker.recover_town();
        assert_eq!(tracker.completed_towns(), 1);
        assert_eq!(tracker.failed_towns(), 2);
        assert_eq!(tracker.snapshot().processed_towns, 3);

        let mut fresh = ProgressTracker::new(SessionId::generate(), 3, 1);
        fresh.recover_town();
        assert_eq!(fresh.completed_towns(), 0);
    }

    #[test]
    fn test_summary_average() {
        let mut summary = SessionSummary {
            completed_towns: 4,
            business_count: 10,
            ..SessionSummary::default()
        };
        summary.finish_averages();
        assert!((summary.businesses_per_town - 2.5).abs() < 1e-9);
    }
}
