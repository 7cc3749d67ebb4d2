//! Retry queue for failed sub-operations.
//!
//! Items are typed by [`RetryKind`] and carry an opaque JSON payload owned by
//! the producer. An item is only handed out once `now >= next_retry_at`;
//! dequeuing removes it atomically, and a consumer that fails again puts it
//! back through [`requeue_after_failure`], which bumps the attempt count.
//! [`take_for_session`] clears a session's items regardless of due time.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use leadscrape_core::SessionId;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Kind of a retry item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryKind {
    /// A page navigation that timed out or failed
    Navigation,
    /// A carrier lookup that exhausted its retries
    Lookup,
    /// A results page that loaded but could not be parsed
    Extraction,
}

impl RetryKind {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Lookup => "lookup",
            Self::Extraction => "extraction",
        }
    }
}

impl fmt::Display for RetryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetryKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "navigation" => Ok(Self::Navigation),
            "lookup" => Ok(Self::Lookup),
            "extraction" => Ok(Self::Extraction),
            other => Err(DatabaseError::Validation(format!(
                "invalid retry kind '{other}': expected navigation, lookup or extraction"
            ))),
        }
    }
}

/// An item to be enqueued.
#[derive(Debug, Clone)]
pub struct NewRetryItem {
    /// Owning session
    pub session_id: SessionId,
    /// Item kind
    pub kind: RetryKind,
    /// Producer-defined JSON payload
    pub payload: String,
    /// Attempts made so far (at least 1)
    pub attempts: u32,
    /// Earliest time the item may be dequeued
    pub next_retry_at: DateTime<Utc>,
}

impl NewRetryItem {
    /// Build an item from an untyped kind, as received from a checkpoint or
    /// an external caller.
    ///
    /// # Errors
    /// Returns `DatabaseError::Validation` for an unknown kind, a zero attempt
    /// count, or a payload that is not JSON.
    pub fn parse(
        session_id: SessionId,
        kind: &str,
        payload: impl Into<String>,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Self> {
        let item = Self {
            session_id,
            kind: kind.parse()?,
            payload: payload.into(),
            attempts,
            next_retry_at,
        };
        item.validate()?;
        Ok(item)
    }

    /// Build an item with a serializable payload.
    ///
    /// # Errors
    /// Returns `DatabaseError::SerializationError` if the payload cannot be serialized.
    pub fn with_payload<T: Serialize>(
        session_id: SessionId,
        kind: RetryKind,
        payload: &T,
        attempts: u32,
        next_retry_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            session_id,
            kind,
            payload: serde_json::to_string(payload)?,
            attempts,
            next_retry_at,
        })
    }

    fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(DatabaseError::Validation(
                "retry item attempts must be at least 1".to_string(),
            ));
        }
        serde_json::from_str::<serde_json::Value>(&self.payload).map_err(|e| {
            DatabaseError::Validation(format!("retry payload is not valid JSON: {e}"))
        })?;
        Ok(())
    }
}

/// A stored retry item.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryItem {
    /// Row id
    pub id: i64,
    /// Owning session
    pub session_id: SessionId,
    /// Item kind
    pub kind: RetryKind,
    /// Producer-defined JSON payload
    pub payload: String,
    /// Attempts made so far
    pub attempts: u32,
    /// Earliest time the item may be dequeued
    pub next_retry_at: DateTime<Utc>,
    /// When the item was first enqueued
    pub created_at: DateTime<Utc>,
}

impl RetryItem {
    /// Decode the payload.
    ///
    /// # Errors
    /// Returns `DatabaseError::SerializationError` if the payload has another shape.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T> {
        serde_json::from_str(&self.payload).map_err(Into::into)
    }
}

const RETURNING_COLUMNS: &str =
    "RETURNING id, session_id, kind, payload, attempts, next_retry_at, created_at";

/// Add an item to the queue.
///
/// # Errors
/// Returns `DatabaseError::Validation` for a malformed item or `DatabaseError::Sqlx`
/// if the session does not exist.
pub async fn enqueue_retry(pool: &Pool<Sqlite>, item: &NewRetryItem) -> Result<RetryItem> {
    item.validate()?;

    let row = sqlx::query(&format!(
        "INSERT INTO scraper_retry_queue (session_id, kind, payload, attempts, next_retry_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?) {RETURNING_COLUMNS}"
    ))
    .bind(item.session_id.as_str())
    .bind(item.kind.as_str())
    .bind(&item.payload)
    .bind(i64::from(item.attempts))
    .bind(format_timestamp(item.next_retry_at))
    .bind(format_timestamp(Utc::now()))
    .fetch_one(pool)
    .await?;

    let stored = parse_retry_row(&row)?;
    tracing::debug!(
        session_id = %stored.session_id,
        kind = %stored.kind,
        attempts = stored.attempts,
        "Enqueued retry item"
    );
    Ok(stored)
}

/// Remove and return every item, across sessions, that is due at `now`.
///
/// Items come back ordered by due time, then insertion order.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails or a row cannot be decoded.
pub async fn dequeue_eligible_retries(
    pool: &Pool<Sqlite>,
    now: DateTime<Utc>,
) -> Result<Vec<RetryItem>> {
    let rows = sqlx::query(&format!(
        "DELETE FROM scraper_retry_queue WHERE next_retry_at <= ? {RETURNING_COLUMNS}"
    ))
    .bind(format_timestamp(now))
    .fetch_all(pool)
    .await?;

    collect_sorted(&rows)
}

/// Remove and return the due items of one session, limited to `kinds`.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails or a row cannot be decoded.
pub async fn dequeue_eligible_for_session(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    now: DateTime<Utc>,
    kinds: &[RetryKind],
) -> Result<Vec<RetryItem>> {
    delete_for_session(pool, session_id, Some(now), kinds).await
}

/// Remove and return every item of one session limited to `kinds`, due or
/// not.
///
/// # Errors
/// Returns `DatabaseError` if the delete fails or a row cannot be decoded.
pub async fn take_for_session(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    kinds: &[RetryKind],
) -> Result<Vec<RetryItem>> {
    delete_for_session(pool, session_id, None, kinds).await
}

async fn delete_for_session(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    due_by: Option<DateTime<Utc>>,
    kinds: &[RetryKind],
) -> Result<Vec<RetryItem>> {
    if kinds.is_empty() {
        return Ok(Vec::new());
    }

    let placeholders = vec!["?"; kinds.len()].join(", ");
    let due_clause = if due_by.is_some() {
        "AND next_retry_at <= ?"
    } else {
        ""
    };
    let sql = format!(
        "DELETE FROM scraper_retry_queue
         WHERE session_id = ? {due_clause} AND kind IN ({placeholders})
         {RETURNING_COLUMNS}"
    );

    let mut query = sqlx::query(&sql).bind(session_id.as_str());
    if let Some(due_by) = due_by {
        query = query.bind(format_timestamp(due_by));
    }
    for kind in kinds {
        query = query.bind(kind.as_str());
    }
    let rows = query.fetch_all(pool).await?;

    collect_sorted(&rows)
}

/// Put a dequeued item back after another failed attempt.
///
/// The stored attempt count is one higher than the item's.
///
/// # Errors
/// Returns `DatabaseError` if the insert fails.
pub async fn requeue_after_failure(
    pool: &Pool<Sqlite>,
    item: &RetryItem,
    next_retry_at: DateTime<Utc>,
) -> Result<RetryItem> {
    enqueue_retry(
        pool,
        &NewRetryItem {
            session_id: item.session_id.clone(),
            kind: item.kind,
            payload: item.payload.clone(),
            attempts: item.attempts.saturating_add(1),
            next_retry_at,
        },
    )
    .await
}

/// List the queued items of a session without removing them.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn list_pending(pool: &Pool<Sqlite>, session_id: &SessionId) -> Result<Vec<RetryItem>> {
    let rows = sqlx::query(
        "SELECT id, session_id, kind, payload, attempts, next_retry_at, created_at
         FROM scraper_retry_queue WHERE session_id = ?
         ORDER BY next_retry_at ASC, id ASC",
    )
    .bind(session_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.iter().map(parse_retry_row).collect()
}

fn collect_sorted(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<RetryItem>> {
    let mut items = rows
        .iter()
        .map(parse_retry_row)
        .collect::<Result<Vec<_>>>()?;
    items.sort_by(|a, b| {
        a.next_retry_at
            .cmp(&b.next_retry_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(items)
}

fn parse_retry_row(row: &sqlx::sqlite::SqliteRow) -> Result<RetryItem> {
    let session_id: String = row.try_get("session_id")?;
    let kind: String = row.try_get("kind")?;
    let attempts: i64 = row.try_get("attempts")?;
    let next_retry_at: String = row.try_get("next_retry_at")?;
    let created_at: String = row.try_get("created_at")?;

    Ok(RetryItem {
        id: row.try_get("id")?,
        session_id: SessionId::new(session_id).map_err(|e| DatabaseError::Decode(e.to_string()))?,
        kind: kind
            .parse()
            .map_err(|e: DatabaseError| DatabaseError::Decode(e.to_string()))?,
        payload: row.try_get("payload")?,
        attempts: u32::try_from(attempts)
            .map_err(|_| DatabaseError::Decode(format!("attempts out of range: {attempts}")))?,
        next_retry_at: parse_timestamp(&next_retry_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sessions, Database};
    use chrono::Duration;
    use leadscrape_core::ScrapeConfig;

    async fn setup_session() -> (Database, SessionId) {
        let db = Database::new(":memory:")
            .await
            .expect("create test database");
        db.run_migrations().await.expect("run migrations");

        let id = SessionId::generate();
        let config = ScrapeConfig::new(["Alpha"], ["Pharmacy"], 1, 1, 1, true).expect("config");
        sessions::create_session(db.pool(), &id, &config)
            .await
            .expect("create session");
        (db, id)
    }

    fn item(session_id: &SessionId, kind: RetryKind, due: DateTime<Utc>) -> NewRetryItem {
        NewRetryItem {
            session_id: session_id.clone(),
            kind,
            payload: r#"{"town":"Alpha","industry":"Pharmacy"}"#.to_string(),
            attempts: 1,
            next_retry_at: due,
        }
    }

    #[test]
    fn test_retry_kind_parsing() {
        assert_eq!("navigation".parse::<RetryKind>().ok(), Some(RetryKind::Navigation));
        assert_eq!("lookup".parse::<RetryKind>().ok(), Some(RetryKind::Lookup));
        assert_eq!("extraction".parse::<RetryKind>().ok(), Some(RetryKind::Extraction));
        assert!(matches!(
            "captcha".parse::<RetryKind>(),
            Err(DatabaseError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_rejects_unknown_kind() {
        let result = NewRetryItem::parse(SessionId::generate(), "memory", "{}", 1, Utc::now());
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[test]
    fn test_parse_rejects_zero_attempts() {
        let result = NewRetryItem::parse(SessionId::generate(), "lookup", "{}", 0, Utc::now());
        assert!(matches!(result, Err(DatabaseError::Validation(_))));
    }

    #[tokio::test]
    async fn test_check_constraint_rejects_raw_kind() {
        let (db, id) = setup_session().await;
        let result = sqlx::query(
            "INSERT INTO scraper_retry_queue (session_id, kind, payload, attempts, next_retry_at, created_at)
             VALUES (?, 'captcha', '{}', 1, '2026-01-01T00:00:00.000Z', '2026-01-01T00:00:00.000Z')",
        )
        .bind(id.as_str())
        .execute(db.pool())
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_only_due_items_are_dequeued() {
        let (db, id) = setup_session().await;
        let now = Utc::now();

        enqueue_retry(db.pool(), &item(&id, RetryKind::Navigation, now - Duration::seconds(5)))
            .await
            .expect("enqueue past");
        enqueue_retry(db.pool(), &item(&id, RetryKind::Lookup, now))
            .await
            .expect("enqueue now");
        enqueue_retry(db.pool(), &item(&id, RetryKind::Extraction, now + Duration::minutes(5)))
            .await
            .expect("enqueue future");

        let due = dequeue_eligible_retries(db.pool(), now)
            .await
            .expect("dequeue");
        assert_eq!(due.len(), 2);
        assert_eq!(due[0].kind, RetryKind::Navigation);
        assert_eq!(due[1].kind, RetryKind::Lookup);

        let remaining = list_pending(db.pool(), &id).await.expect("list");
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].kind, RetryKind::Extraction);

        let again = dequeue_eligible_retries(db.pool(), now)
            .await
            .expect("dequeue again");
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_session_dequeue_filters_kinds() {
        let (db, id) = setup_session().await;
        let now = Utc::now();
        enqueue_retry(db.pool(), &item(&id, RetryKind::Navigation, now))
            .await
            .expect("enqueue");
        enqueue_retry(db.pool(), &item(&id, RetryKind::Lookup, now))
            .await
            .expect("enqueue");

        let scrape_items = dequeue_eligible_for_session(
            db.pool(),
            &id,
            now,
            &[RetryKind::Navigation, RetryKind::Extraction],
        )
        .await
        .expect("dequeue");
        assert_eq!(scrape_items.len(), 1);
        assert_eq!(scrape_items[0].kind, RetryKind::Navigation);

        let pending = list_pending(db.pool(), &id).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, RetryKind::Lookup);
    }

    #[tokio::test]
    async fn test_take_for_session_ignores_due_time() {
        let (db, id) = setup_session().await;
        let now = Utc::now();
        enqueue_retry(db.pool(), &item(&id, RetryKind::Lookup, now + Duration::minutes(10)))
            .await
            .expect("enqueue future lookup");
        enqueue_retry(db.pool(), &item(&id, RetryKind::Lookup, now - Duration::seconds(1)))
            .await
            .expect("enqueue due lookup");
        enqueue_retry(db.pool(), &item(&id, RetryKind::Extraction, now + Duration::minutes(10)))
            .await
            .expect("enqueue extraction");

        let taken = take_for_session(db.pool(), &id, &[RetryKind::Lookup])
            .await
            .expect("take");
        assert_eq!(taken.len(), 2);
        assert!(taken[0].next_retry_at < taken[1].next_retry_at);

        let pending = list_pending(db.pool(), &id).await.expect("list");
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].kind, RetryKind::Extraction);

        assert!(take_for_session(db.pool(), &id, &[])
            .await
            .expect("take nothing")
            .is_empty());
    }

    #[tokio::test]
    async fn test_requeue_increments_attempts() {
        let (db, id) = setup_session().await;
        let now = Utc::now();
        enqueue_retry(db.pool(), &item(&id, RetryKind::Navigation, now))
            .await
            .expect("enqueue");

        let mut due = dequeue_eligible_retries(db.pool(), now)
            .await
            .expect("dequeue");
        let first = due.pop().expect("one item");
        let requeued = requeue_after_failure(db.pool(), &first, now + Duration::seconds(2))
            .await
            .expect("requeue");

        assert_eq!(requeued.attempts, first.attempts + 1);
        assert_eq!(requeued.payload, first.payload);
        assert!(dequeue_eligible_retries(db.pool(), now)
            .await
            .expect("dequeue early")
            .is_empty());
    }

    #[tokio::test]
    async fn test_payload_decodes() {
        #[derive(Debug, Serialize, Deserialize, PartialEq)]
        struct Pair {
            town: String,
            industry: String,
        }

        let (db, id) = setup_session().await;
        let pair = Pair {
            town: "Alpha".into(),
            industry: "Cafe".into(),
        };
        let stored = enqueue_retry(
            db.pool(),
            &NewRetryItem::with_payload(id.clone(), RetryKind::Extraction, &pair, 2, Utc::now())
                .expect("build item"),
        )
        .await
        .expect("enqueue");

        assert_eq!(stored.payload_as::<Pair>().expect("decode"), pair);
    }

    #[tokio::test]
    async fn test_retry_items_cascade_with_session() {
        let (db, id) = setup_session().await;
        enqueue_retry(db.pool(), &item(&id, RetryKind::Lookup, Utc::now()))
            .await
            .expect("enqueue");

        sessions::delete_session(db.pool(), &id)
            .await
            .expect("delete session");
        assert!(list_pending(db.pool(), &id).await.expect("list").is_empty());
    }
}
