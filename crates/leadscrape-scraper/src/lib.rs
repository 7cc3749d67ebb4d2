//! Leadscrape Scraper - session orchestration for map-search extraction.
//!
//! This crate runs scrape sessions: it spreads towns over a bounded pool of
//! browser workers, persists records and checkpoints as each town finishes,
//! resolves carriers once extraction is over, and exports the result.
//!
//! # Features
//!
//! - Bounded worker pool, one browser per worker, industries scraped
//!   concurrently within a town
//! - Cooperative pause, resume and stop keyed by session id
//! - Versioned checkpoints and a retry queue for failed industries
//! - Progress, log and completion events on a broadcast stream
//! - Spreadsheet export with one sheet per carrier
//!
//! # Example
//!
//! ```rust,ignore
//! use leadscrape_scraper::ScrapingOrchestrator;
//!
//! let orchestrator = ScrapingOrchestrator::new(pool, launcher, lookup, config.scraping);
//! let handle = orchestrator.start(scrape_config).await?;
//! let outcome = handle.wait().await?;
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod checkpoint;
mod coordinator;
pub mod error;
pub mod events;
pub mod export;
pub mod orchestrator;
pub mod session;
pub mod worker;

// Re-export commonly used types
pub use checkpoint::{BatchState, PairFailure, SessionCheckpoint, BATCH_STATE_VERSION};
pub use error::{Result, ScrapeError};
pub use events::{
    CompletionReport, LogEntry, LogLevel, ProgressUpdate, ScrapeEvent, SessionSummary,
};
pub use export::{export_session, write_workbook, ExportReport};
pub use orchestrator::{LookupRetry, LookupTally, ScrapingOrchestrator};
pub use session::{
    ControlSignal, SessionController, SessionHandle, SessionOutcome, SessionStatusReport,
};
pub use worker::{BrowserWorker, TownOutcome, WorkerOptions, WorkerState};
