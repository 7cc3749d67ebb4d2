//! Leadscrape Database Layer
//!
//! Provides `SQLite` persistence for scrape sessions and everything that makes
//! a long-running session resumable. Uses `SQLx` with embedded migrations.
//!
//! # Architecture
//!
//! - **Sessions**: session metadata and the business records a session produced
//! - **Checkpoints**: one resumable snapshot per session (upsert semantics)
//! - **Retry queue**: failed sub-operations with a next-eligible timestamp
//! - **Metrics**: append-only operational measurements
//! - **Provider cache**: phone number to carrier, shared across sessions
//!
//! Every session-scoped table cascades on session delete.
//!
//! # Example
//!
//! ```ignore
//! use leadscrape_db::Database;
//!
//! let db = Database::new("leadscrape.db").await?;
//! db.run_migrations().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod businesses;
pub mod checkpoints;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod migrations;
pub mod provider_cache;
pub mod retry_queue;
pub mod sessions;

// Re-export commonly used types
pub use checkpoints::{CheckpointData, CheckpointRow};
pub use connection::ConnectionPool;
pub use error::{DatabaseError, Result};
pub use metrics::{MetricKind, MetricRow};
pub use provider_cache::ProviderCacheEntry;
pub use retry_queue::{NewRetryItem, RetryItem, RetryKind};
pub use sessions::SessionRecord;

use chrono::{DateTime, SecondsFormat, Utc};
use std::path::Path;

/// High-level database interface with migrations.
///
/// This provides a convenient wrapper around `ConnectionPool` that handles
/// initialization and migration.
#[derive(Debug, Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Open a database at the specified path.
    ///
    /// # Arguments
    /// * `path` - Path to the database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if the database cannot be opened.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let pool = ConnectionPool::new(path).await?;
        Ok(Self { pool })
    }

    /// Create a database instance from an existing connection pool.
    #[must_use]
    pub fn from_connection_pool(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    /// Run all pending database migrations.
    ///
    /// # Errors
    /// Returns `DatabaseError::Migration` if any migration fails.
    pub async fn run_migrations(&self) -> Result<()> {
        migrations::run_migrations(self.pool.pool()).await
    }

    /// Get the current schema version.
    ///
    /// # Errors
    /// Returns `DatabaseError` if the version cannot be queried.
    pub async fn get_schema_version(&self) -> Result<i64> {
        migrations::get_schema_version(self.pool.pool()).await
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Sqlite> {
        self.pool.pool()
    }

    /// Get a reference to the connection pool wrapper.
    #[must_use]
    pub fn connection_pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Close the database connection gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Format a timestamp the way every table stores it.
///
/// Millisecond precision with a `Z` suffix keeps lexical and chronological
/// order identical, which the retry-queue due scan relies on.
#[must_use]
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a stored RFC 3339 timestamp.
pub(crate) fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, sqlx::Error> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Parse an optional stored RFC 3339 timestamp.
pub(crate) fn parse_optional_timestamp(
    value: Option<String>,
) -> std::result::Result<Option<DateTime<Utc>>, sqlx::Error> {
    value.as_deref().map(parse_timestamp).transpose()
}
