//! Checkpoint store.
//!
//! Exactly one checkpoint row exists per session. Writes are upserts keyed by
//! `session_id`; the row's `updated_at` moves forward on every write, either
//! from the statement itself or from the `trg_scraper_checkpoints_touch`
//! trigger when a raw update leaves it unchanged.
//!
//! The `retry_queue` and `batch_state` columns hold opaque JSON documents. This
//! layer only checks that they parse; their schema belongs to the scraper.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use leadscrape_core::SessionId;
use sqlx::{Pool, Row, Sqlite};

/// Mutable part of a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointData {
    /// Town most recently dispatched to a worker
    pub current_town: Option<String>,
    /// Industry most recently attempted
    pub current_industry: Option<String>,
    /// Businesses processed so far
    pub processed_count: u32,
    /// Serialized retry queue (JSON array)
    pub retry_queue: String,
    /// Serialized batch state (JSON object)
    pub batch_state: String,
}

impl Default for CheckpointData {
    fn default() -> Self {
        Self {
            current_town: None,
            current_industry: None,
            processed_count: 0,
            retry_queue: "[]".to_string(),
            batch_state: "{}".to_string(),
        }
    }
}

/// A stored checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointRow {
    /// Owning session
    pub session_id: SessionId,
    /// Checkpoint contents
    pub data: CheckpointData,
    /// First write
    pub created_at: DateTime<Utc>,
    /// Most recent write
    pub updated_at: DateTime<Utc>,
}

/// Create or replace the checkpoint of a session.
///
/// # Errors
/// Returns `DatabaseError::Validation` if either JSON column does not parse,
/// or `DatabaseError::Sqlx` if the session does not exist or the write fails.
pub async fn save_checkpoint(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    data: &CheckpointData,
) -> Result<CheckpointRow> {
    ensure_json("retry_queue", &data.retry_queue)?;
    ensure_json("batch_state", &data.batch_state)?;

    let now = format_timestamp(Utc::now());

    sqlx::query(
        "INSERT INTO scraper_checkpoints
         (session_id, current_industry, current_town, processed_count, retry_queue, batch_state, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(session_id) DO UPDATE SET
            current_industry = excluded.current_industry,
            current_town = excluded.current_town,
            processed_count = excluded.processed_count,
            retry_queue = excluded.retry_queue,
            batch_state = excluded.batch_state,
            updated_at = excluded.updated_at",
    )
    .bind(session_id.as_str())
    .bind(&data.current_industry)
    .bind(&data.current_town)
    .bind(i64::from(data.processed_count))
    .bind(&data.retry_queue)
    .bind(&data.batch_state)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;

    load_checkpoint(pool, session_id)
        .await?
        .ok_or_else(|| DatabaseError::NotFoundWithMessage(format!(
            "Checkpoint for session '{session_id}' vanished after write"
        )))
}

/// Load the checkpoint of a session.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a stored value cannot be decoded.
pub async fn load_checkpoint(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
) -> Result<Option<CheckpointRow>> {
    let row = sqlx::query(
        "SELECT session_id, current_industry, current_town, processed_count, retry_queue,
                batch_state, created_at, updated_at
         FROM scraper_checkpoints WHERE session_id = ?",
    )
    .bind(session_id.as_str())
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let processed: i64 = row.try_get("processed_count")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Some(CheckpointRow {
        session_id: session_id.clone(),
        data: CheckpointData {
            current_town: row.try_get("current_town")?,
            current_industry: row.try_get("current_industry")?,
            processed_count: u32::try_from(processed).map_err(|_| {
                DatabaseError::Decode(format!("processed_count out of range: {processed}"))
            })?,
            retry_queue: row.try_get("retry_queue")?,
            batch_state: row.try_get("batch_state")?,
        },
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    }))
}

/// Delete the checkpoint of a session.
///
/// Returns `true` if a checkpoint existed.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails.
pub async fn delete_checkpoint(pool: &Pool<Sqlite>, session_id: &SessionId) -> Result<bool> {
    let result = sqlx::query("DELETE FROM scraper_checkpoints WHERE session_id = ?")
        .bind(session_id.as_str())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn ensure_json(column: &str, value: &str) -> Result<()> {
    serde_json::from_str::<serde_json::Value>(value)
        .map(|_| ())
        .map_err(|e| DatabaseError::Validation(format!("{column} is not valid JSON: {e}")))
}
