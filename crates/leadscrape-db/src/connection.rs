//! Database connection management.
//!
//! Provides a `ConnectionPool` wrapper around `SQLx` that configures `SQLite`
//! for concurrent writers: foreign keys on every connection, WAL journaling
//! for file databases, and a busy timeout instead of immediate lock errors.

use crate::error::{DatabaseError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MEMORY_PATH: &str = ":memory:";

/// `SQLite` connection pool.
#[derive(Debug, Clone)]
pub struct ConnectionPool {
    pool: Pool<Sqlite>,
}

impl ConnectionPool {
    /// Open (or create) a database and build a connection pool for it.
    ///
    /// # Arguments
    /// * `path` - Path to the `SQLite` database file (or `:memory:` for in-memory)
    ///
    /// # Errors
    /// Returns `DatabaseError` if:
    /// - The path is not valid UTF-8
    /// - The parent directory cannot be created
    /// - The database cannot be opened
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            DatabaseError::Open("invalid database path: not valid UTF-8".to_string())
        })?;
        let in_memory = path_str == MEMORY_PATH;

        if !in_memory {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut connect_options = SqliteConnectOptions::from_str(path_str)
            .map_err(|e| DatabaseError::Open(format!("invalid connection string: {e}")))?
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        // An in-memory database lives only as long as its connections, so the
        // pool keeps exactly one connection open for its whole lifetime.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            connect_options = connect_options.journal_mode(SqliteJournalMode::Wal);
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .connect_with(connect_options)
            .await
            .map_err(|e| DatabaseError::Open(format!("failed to initialize pool: {e}")))?;

        tracing::info!("Database pool created at {}", path_str);

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    #[must_use]
    pub fn from_pool(pool: Pool<Sqlite>) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying `SQLx` pool.
    #[must_use]
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Close the connection pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("Database pool closed");
    }

    /// Check that the database answers queries.
    ///
    /// # Errors
    /// Returns `DatabaseError::Sqlx` if the pool is closed or the file is unreadable.
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pool_creation() {
        let pool = ConnectionPool::new(":memory:")
            .await
            .expect("create pool");

        pool.ping().await.expect("ping database");
    }

    #[tokio::test]
    async fn test_file_pool_creates_parent_dirs() {
        let tmp = tempfile::TempDir::new().expect("create temp dir");
        let path = tmp.path().join("nested").join("leads.db");

        let pool = ConnectionPool::new(&path).await.expect("create pool");
        pool.ping().await.expect("ping database");
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = ConnectionPool::new(":memory:")
            .await
            .expect("create pool");

        let enabled: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
            .fetch_one(pool.pool())
            .await
            .expect("read pragma");
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_ping_after_close_fails() {
        let pool = ConnectionPool::new(":memory:")
            .await
            .expect("create pool");

        pool.close().await;
        assert!(pool.ping().await.is_err());
    }
}
