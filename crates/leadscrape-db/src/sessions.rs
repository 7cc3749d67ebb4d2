//! Scrape session persistence.
//!
//! This module provides CRUD operations for the `scrape_sessions` table. The
//! orchestrator is the only writer; status changes go through
//! [`update_status`], which refuses to move a session out of a terminal state.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use leadscrape_core::{ScrapeConfig, SessionId, SessionStatus};
use serde::{de::DeserializeOwned, Serialize};
use sqlx::{Pool, Row, Sqlite};

/// Persisted state of one scrape session.
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Session identifier
    pub id: SessionId,
    /// Lifecycle state
    pub status: SessionStatus,
    /// Configuration the session was started with
    pub config: ScrapeConfig,
    /// Number of towns in the session
    pub total_towns: u32,
    /// Towns that finished successfully
    pub completed_towns: u32,
    /// Towns that exhausted their attempt budget
    pub failed_towns: u32,
    /// Business records persisted so far
    pub business_count: u32,
    /// When the session first entered `running`
    pub started_at: Option<DateTime<Utc>>,
    /// When the session entered a terminal state
    pub completed_at: Option<DateTime<Utc>>,
    /// When the checkpoint was last written
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    /// Originating error for failed sessions
    pub error_message: Option<String>,
    /// Serialized completion summary
    pub summary: Option<String>,
    /// Row creation time
    pub created_at: DateTime<Utc>,
    /// Last modification time
    pub updated_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Decode the stored summary into the caller's summary type.
    ///
    /// # Errors
    /// Returns `DatabaseError::SerializationError` if the summary is malformed.
    pub fn summary_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.summary
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(Into::into)
    }
}

const SELECT_COLUMNS: &str = "SELECT id, status, config, total_towns, completed_towns, failed_towns,
        business_count, started_at, completed_at, last_checkpoint_at, error_message, summary,
        created_at, updated_at
     FROM scrape_sessions";

/// Create a session in `pending` state.
///
/// # Errors
/// Returns `DatabaseError` if the config cannot be serialized or the insert fails
/// (including a duplicate session id).
pub async fn create_session(
    pool: &Pool<Sqlite>,
    id: &SessionId,
    config: &ScrapeConfig,
) -> Result<SessionRecord> {
    let now = Utc::now();
    let config_json = serde_json::to_string(config)?;
    let total_towns = u32::try_from(config.towns.len())
        .map_err(|_| DatabaseError::Validation("too many towns".to_string()))?;

    sqlx::query(
        "INSERT INTO scrape_sessions (id, status, config, total_towns, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id.as_str())
    .bind(SessionStatus::Pending.as_str())
    .bind(&config_json)
    .bind(i64::from(total_towns))
    .bind(format_timestamp(now))
    .bind(format_timestamp(now))
    .execute(pool)
    .await?;

    tracing::debug!(session_id = %id, total_towns, "Created scrape session");

    Ok(SessionRecord {
        id: id.clone(),
        status: SessionStatus::Pending,
        config: config.clone(),
        total_towns,
        completed_towns: 0,
        failed_towns: 0,
        business_count: 0,
        started_at: None,
        completed_at: None,
        last_checkpoint_at: None,
        error_message: None,
        summary: None,
        created_at: now,
        updated_at: now,
    })
}

/// Get a session by id.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a stored value cannot be decoded.
pub async fn get_session(pool: &Pool<Sqlite>, id: &SessionId) -> Result<Option<SessionRecord>> {
    let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = ?"))
        .bind(id.as_str())
        .fetch_optional(pool)
        .await?;

    row.map(|row| parse_session_row(&row)).transpose()
}

/// List all sessions, newest first.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a stored value cannot be decoded.
pub async fn list_sessions(pool: &Pool<Sqlite>) -> Result<Vec<SessionRecord>> {
    let rows = sqlx::query(&format!("{SELECT_COLUMNS} ORDER BY created_at DESC"))
        .fetch_all(pool)
        .await?;

    rows.iter().map(parse_session_row).collect()
}

/// List sessions in a given state, oldest first.
///
/// Used at startup to find sessions left `running` by a crashed process.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a stored value cannot be decoded.
pub async fn list_sessions_by_status(
    pool: &Pool<Sqlite>,
    status: SessionStatus,
) -> Result<Vec<SessionRecord>> {
    let rows = sqlx::query(&format!(
        "{SELECT_COLUMNS} WHERE status = ? ORDER BY created_at ASC"
    ))
    .bind(status.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_session_row).collect()
}

/// Move a session to a new lifecycle state.
///
/// Setting the current state again is a no-op. The first move to `running`
/// stamps `started_at`; a move to a terminal state stamps `completed_at`.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` for an unknown session and
/// `DatabaseError::Validation` if the session is terminal or the move is not a
/// legal lifecycle step.
pub async fn update_status(
    pool: &Pool<Sqlite>,
    id: &SessionId,
    status: SessionStatus,
    error_message: Option<&str>,
) -> Result<()> {
    let current: Option<String> =
        sqlx::query_scalar("SELECT status FROM scrape_sessions WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(pool)
            .await?;

    let current = current
        .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!("Session '{id}' not found")))?;
    let current: SessionStatus = current
        .parse()
        .map_err(|e: leadscrape_core::LeadscrapeError| DatabaseError::Decode(e.to_string()))?;

    if current.is_terminal() {
        return Err(DatabaseError::Validation(format!(
            "session '{id}' is already {current}"
        )));
    }
    if current == status {
        return Ok(());
    }
    if !current.can_transition_to(status) {
        return Err(DatabaseError::Validation(format!(
            "session '{id}' cannot move from {current} to {status}"
        )));
    }

    let now = format_timestamp(Utc::now());
    let started_at = (status == SessionStatus::Running).then(|| now.clone());
    let completed_at = status.is_terminal().then(|| now.clone());

    sqlx::query(
        "UPDATE scrape_sessions
         SET status = ?,
             started_at = COALESCE(started_at, ?),
             completed_at = COALESCE(?, completed_at),
             error_message = COALESCE(?, error_message),
             updated_at = ?
         WHERE id = ?",
    )
    .bind(status.as_str())
    .bind(started_at)
    .bind(completed_at)
    .bind(error_message)
    .bind(&now)
    .bind(id.as_str())
    .execute(pool)
    .await?;

    tracing::debug!(session_id = %id, from = %current, to = %status, "Session status changed");
    Ok(())
}

/// Record town and business counters.
///
/// # Errors
/// Returns `DatabaseError::NotFoundWithMessage` if the session does not exist.
pub async fn update_progress(
    pool: &Pool<Sqlite>,
    id: &SessionId,
    completed_towns: u32,
    failed_towns: u32,
    business_count: u32,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE scrape_sessions
         SET completed_towns = ?, failed_towns = ?, business_count = ?, updated_at = ?
         WHERE id = ?",
    )
    .bind(i64::from(completed_towns))
    .bind(i64::from(failed_towns))
    .bind(i64::from(business_count))
    .bind(format_timestamp(Utc::now()))
    .bind(id.as_str())
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        return Err(DatabaseError::NotFoundWithMessage(format!(
            "Session '{id}' not found"
        )));
    }
    Ok(())
}

/// Stamp the time the session's checkpoint was last written.
///
/// # Errors
/// Returns `DatabaseError` if the update fails.
pub async fn touch_checkpoint(
    pool: &Pool<Sqlite>,
    id: &SessionId,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query("UPDATE scrape_sessions SET last_checkpoint_at = ? WHERE id = ?")
        .bind(format_timestamp(at))
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Store the completion summary as JSON.
///
/// # Errors
/// Returns `DatabaseError` if serialization or the update fails.
pub async fn save_summary<T: Serialize>(
    pool: &Pool<Sqlite>,
    id: &SessionId,
    summary: &T,
) -> Result<()> {
    let json = serde_json::to_string(summary)?;
    sqlx::query("UPDATE scrape_sessions SET summary = ?, updated_at = ? WHERE id = ?")
        .bind(json)
        .bind(format_timestamp(Utc::now()))
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(())
}

/// Delete a session and, through cascades, everything it owns.
///
/// Returns `true` if a session was deleted.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails.
pub async fn delete_session(pool: &Pool<Sqlite>, id: &SessionId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM scrape_sessions WHERE id = ?")
        .bind(id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn parse_session_row(row: &sqlx::sqlite::SqliteRow) -> Result<SessionRecord> {
    let id: String = row.try_get("id")?;
    let id = SessionId::new(id).map_err(|e| DatabaseError::Decode(e.to_string()))?;

    let status: String = row.try_get("status")?;
    let status = status
        .parse::<SessionStatus>()
        .map_err(|e| DatabaseError::Decode(e.to_string()))?;

    let config: String = row.try_get("config")?;
    let config: ScrapeConfig = serde_json::from_str(&config)?;

    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(SessionRecord {
        id,
        status,
        config,
        total_towns: read_count(row, "total_towns")?,
        completed_towns: read_count(row, "completed_towns")?,
        failed_towns: read_count(row, "failed_towns")?,
        business_count: read_count(row, "business_count")?,
        started_at: parse_optional_timestamp(row.try_get("started_at")?)?,
        completed_at: parse_optional_timestamp(row.try_get("completed_at")?)?,
        last_checkpoint_at: parse_optional_timestamp(row.try_get("last_checkpoint_at")?)?,
        error_message: row.try_get("error_message")?,
        summary: row.try_get("summary")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn read_count(row: &sqlx::sqlite::SqliteRow, column: &str) -> Result<u32> {
    let value: i64 = row.try_get(column)?;
    u32::try_from(value).map_err(|_| DatabaseError::Decode(format!("{column} out of range: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Database;

    async fn setup_test_db() -> Database {
        let db = Database::new(":memory:")
            .await
            .expect("create test database");
        db.run_migrations().await.expect("run migrations");
        db
    }

    fn test_config() -> ScrapeConfig {
        ScrapeConfig::new(["Alpha", "Beta", "Gamma"], ["Pharmacy", "Cafe"], 2, 2, 1, true)
            .expect("valid config")
    }

    #[tokio::test]
    async fn test_create_and_get_session() {
        let db = setup_test_db().await;
        let id = SessionId::generate();

        let created = create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");
        assert_eq!(created.status, SessionStatus::Pending);
        assert_eq!(created.total_towns, 3);

        let loaded = get_session(db.pool(), &id)
            .await
            .expect("get session")
            .expect("session exists");
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.config, test_config());
        assert_eq!(loaded.total_towns, 3);
        assert!(loaded.started_at.is_none());
    }

    #[tokio::test]
    async fn test_get_missing_session_returns_none() {
        let db = setup_test_db().await;
        let missing = get_session(db.pool(), &SessionId::generate())
            .await
            .expect("query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_status_lifecycle_stamps_times() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");

        update_status(db.pool(), &id, SessionStatus::Running, None)
            .await
            .expect("start");
        update_status(db.pool(), &id, SessionStatus::Paused, None)
            .await
            .expect("pause");
        update_status(db.pool(), &id, SessionStatus::Running, None)
            .await
            .expect("resume");
        update_status(db.pool(), &id, SessionStatus::Completed, None)
            .await
            .expect("complete");

        let session = get_session(db.pool(), &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(session.status, SessionStatus::Completed);
        assert!(session.started_at.is_some());
        assert!(session.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_session_rejects_updates() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");
        update_status(db.pool(), &id, SessionStatus::Running, None)
            .await
            .expect("start");
        update_status(db.pool(), &id, SessionStatus::Stopped, None)
            .await
            .expect("stop");

        let result = update_status(db.pool(), &id, SessionStatus::Running, None).await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));

        let session = get_session(db.pool(), &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(session.status, SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_illegal_transition_rejected() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");

        let result = update_status(db.pool(), &id, SessionStatus::Paused, None).await;
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_session_keeps_error_message() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");
        update_status(db.pool(), &id, SessionStatus::Running, None)
            .await
            .expect("start");
        update_status(db.pool(), &id, SessionStatus::Failed, Some("disk full"))
            .await
            .expect("fail");

        let session = get_session(db.pool(), &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(session.error_message.as_deref(), Some("disk full"));
    }

    #[tokio::test]
    async fn test_update_missing_session() {
        let db = setup_test_db().await;
        let result = update_status(
            db.pool(),
            &SessionId::generate(),
            SessionStatus::Running,
            None,
        )
        .await;
        assert!(matches!(result, Err(DatabaseError::NotFoundWithMessage(_))));

        let result = update_progress(db.pool(), &SessionId::generate(), 1, 0, 5).await;
        assert!(matches!(result, Err(DatabaseError::NotFoundWithMessage(_))));
    }

    #[tokio::test]
    async fn test_progress_summary_and_listing() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");
        update_status(db.pool(), &id, SessionStatus::Running, None)
            .await
            .expect("start");

        update_progress(db.pool(), &id, 2, 1, 17)
            .await
            .expect("update progress");
        touch_checkpoint(db.pool(), &id, Utc::now())
            .await
            .expect("touch checkpoint");
        save_summary(db.pool(), &id, &serde_json::json!({"towns": 3}))
            .await
            .expect("save summary");

        let session = get_session(db.pool(), &id)
            .await
            .expect("get")
            .expect("exists");
        assert_eq!(session.completed_towns, 2);
        assert_eq!(session.failed_towns, 1);
        assert_eq!(session.business_count, 17);
        assert!(session.last_checkpoint_at.is_some());
        let summary: serde_json::Value = session
            .summary_as()
            .expect("decode summary")
            .expect("summary present");
        assert_eq!(summary["towns"], 3);

        let running = list_sessions_by_status(db.pool(), SessionStatus::Running)
            .await
            .expect("list running");
        assert_eq!(running.len(), 1);
        assert_eq!(list_sessions(db.pool()).await.expect("list").len(), 1);
    }

    #[tokio::test]
    async fn test_delete_session() {
        let db = setup_test_db().await;
        let id = SessionId::generate();
        create_session(db.pool(), &id, &test_config())
            .await
            .expect("create session");

        assert!(delete_session(db.pool(), &id).await.expect("delete"));
        assert!(!delete_session(db.pool(), &id).await.expect("delete again"));
    }
}
