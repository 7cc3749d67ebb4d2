//! Persistent carrier cache keyed by normalized phone number.
//!
//! Entries are written back after a live lookup and never invalidated, so a
//! number is looked up at most once per database. Each write is a single
//! upsert, which gives key-level atomicity for concurrent lookup lanes.

use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use leadscrape_core::Carrier;
use sqlx::{Pool, Row, Sqlite};

/// A cached carrier assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderCacheEntry {
    /// Normalized phone number
    pub phone_key: String,
    /// Carrier label (`unknown` for unattributable numbers)
    pub carrier: Carrier,
    /// Backend confidence in `[0, 1]`
    pub confidence: f64,
    /// When the lookup ran
    pub looked_up_at: DateTime<Utc>,
}

/// Read an entry.
///
/// # Errors
/// Returns `sqlx::Error` if the query fails or the timestamp cannot be decoded.
pub async fn get_entry(
    pool: &Pool<Sqlite>,
    phone_key: &str,
) -> Result<Option<ProviderCacheEntry>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT phone_key, carrier, confidence, looked_up_at FROM provider_cache WHERE phone_key = ?",
    )
    .bind(phone_key)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let carrier: String = row.try_get("carrier")?;
    let looked_up_at: String = row.try_get("looked_up_at")?;
    Ok(Some(ProviderCacheEntry {
        phone_key: row.try_get("phone_key")?,
        carrier: Carrier::from(carrier),
        confidence: row.try_get("confidence")?,
        looked_up_at: parse_timestamp(&looked_up_at)?,
    }))
}

/// Insert or replace an entry.
///
/// # Errors
/// Returns `sqlx::Error` if the write fails.
pub async fn put_entry(pool: &Pool<Sqlite>, entry: &ProviderCacheEntry) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO provider_cache (phone_key, carrier, confidence, looked_up_at)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(phone_key) DO UPDATE SET
            carrier = excluded.carrier,
            confidence = excluded.confidence,
            looked_up_at = excluded.looked_up_at",
    )
    .bind(&entry.phone_key)
    .bind(entry.carrier.label())
    .bind(entry.confidence.clamp(0.0, 1.0))
    .bind(format_timestamp(entry.looked_up_at))
    .execute(pool)
    .await?;
    Ok(())
}

/// Number of cached entries.
///
/// # Errors
/// Returns `sqlx::Error` if the query fails.
pub async fn count_entries(pool: &Pool<Sqlite>) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar("SELECT COUNT(*) FROM provider_cache")
        .fetch_one(pool)
        .await
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

    fn entry(key: &str, carrier: Carrier) -> ProviderCacheEntry {
        ProviderCacheEntry {
            phone_key: key.to_string(),
            carrier,
            confidence: 0.9,
            looked_up_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_put_and_get_entry() {
        let db = setup_test_db().await;
        put_entry(db.pool(), &entry("0111234567", Carrier::Named("Etisalat".into())))
            .await
            .expect("put");

        let cached = get_entry(db.pool(), "0111234567")
            .await
            .expect("get")
            .expect("entry exists");
        assert_eq!(cached.carrier, Carrier::Named("Etisalat".into()));
        assert!((cached.confidence - 0.9).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_miss_returns_none() {
        let db = setup_test_db().await;
        assert!(get_entry(db.pool(), "0100000000")
            .await
            .expect("get")
            .is_none());
    }

    #[tokio::test]
    async fn test_put_overwrites_same_key() {
        let db = setup_test_db().await;
        put_entry(db.pool(), &entry("0121234567", Carrier::Unknown))
            .await
            .expect("put unknown");
        put_entry(db.pool(), &entry("0121234567", Carrier::Named("Orange".into())))
            .await
            .expect("put orange");

        assert_eq!(count_entries(db.pool()).await.expect("count"), 1);
        let cached = get_entry(db.pool(), "0121234567")
            .await
            .expect("get")
            .expect("entry exists");
        assert_eq!(cached.carrier, Carrier::Named("Orange".into()));
    }

    #[tokio::test]
    async fn test_unknown_is_cached() {
        let db = setup_test_db().await;
        put_entry(db.pool(), &entry("0199999999", Carrier::Unknown))
            .await
            .expect("put");
        let cached = get_entry(db.pool(), "0199999999")
            .await
            .expect("get")
            .expect("entry exists");
        assert_eq!(cached.carrier, Carrier::Unknown);
    }
}
