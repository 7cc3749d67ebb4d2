//! Business records produced by a session.
//!
//! Records for a town are inserted in one transaction once the town finishes,
//! so a crash never leaves half a town behind. Carriers are applied in place
//! after the lookup phase.

use crate::format_timestamp;
use chrono::Utc;
use leadscrape_core::{BusinessRecord, Carrier, SessionId};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;

/// Insert records for a session in a single transaction.
///
/// Returns the number of rows inserted.
///
/// # Errors
/// Returns `sqlx::Error` if any insert fails; nothing is written in that case.
pub async fn insert_businesses(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    records: &[BusinessRecord],
) -> Result<u64, sqlx::Error> {
    if records.is_empty() {
        return Ok(0);
    }

    let created_at = format_timestamp(Utc::now());
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for record in records {
        let result = sqlx::query(
            "INSERT INTO scrape_businesses
             (session_id, name, phone, address, category, town, industry, map_url, carrier, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(session_id.as_str())
        .bind(&record.name)
        .bind(&record.phone)
        .bind(&record.address)
        .bind(&record.category)
        .bind(&record.town)
        .bind(&record.industry)
        .bind(&record.map_url)
        .bind(record.carrier.label())
        .bind(&created_at)
        .execute(&mut *tx)
        .await?;
        inserted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(inserted)
}

/// Get all records of a session in insertion order.
///
/// # Errors
/// Returns `sqlx::Error` if the query fails.
pub async fn get_businesses(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
) -> Result<Vec<BusinessRecord>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT name, phone, address, category, town, industry, map_url, carrier
         FROM scrape_businesses WHERE session_id = ? ORDER BY id ASC",
    )
    .bind(session_id.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| -> Result<BusinessRecord, sqlx::Error> {
            let carrier: String = row.try_get("carrier")?;
            Ok(BusinessRecord {
                name: row.try_get("name")?,
                phone: row.try_get("phone")?,
                address: row.try_get("address")?,
                category: row.try_get("category")?,
                town: row.try_get("town")?,
                industry: row.try_get("industry")?,
                map_url: row.try_get("map_url")?,
                carrier: Carrier::from(carrier),
            })
        })
        .collect()
}

/// Count records of a session.
///
/// # Errors
/// Returns `sqlx::Error` if the query fails.
pub async fn count_businesses(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
) -> Result<u64, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM scrape_businesses WHERE session_id = ?")
            .bind(session_id.as_str())
            .fetch_one(pool)
            .await?;
    Ok(u64::try_from(count).unwrap_or_default())
}

/// Delete the records a session stored for `towns`.
///
/// Resume uses this to drop records of towns that are about to be scraped
/// again. Returns the number of rows deleted.
///
/// # Errors
/// Returns `sqlx::Error` if any delete fails; nothing is deleted in that case.
pub async fn delete_town_businesses(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    towns: &[String],
) -> Result<u64, sqlx::Error> {
    if towns.is_empty() {
        return Ok(0);
    }

    let mut tx = pool.begin().await?;
    let mut deleted = 0;
    for town in towns {
        let result = sqlx::query("DELETE FROM scrape_businesses WHERE session_id = ? AND town = ?")
            .bind(session_id.as_str())
            .bind(town)
            .execute(&mut *tx)
            .await?;
        deleted += result.rows_affected();
    }

    tx.commit().await?;
    Ok(deleted)
}

/// Apply resolved carriers keyed by the raw phone string.
///
/// Records without a phone number are marked `unknown`, since no lookup can
/// resolve them. Returns the number of rows updated.
///
/// # Errors
/// Returns `sqlx::Error` if any update fails; nothing is written in that case.
pub async fn apply_carriers(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    carriers: &HashMap<String, Carrier>,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut updated = 0;

    for (phone, carrier) in carriers {
        let result = sqlx::query(
            "UPDATE scrape_businesses SET carrier = ? WHERE session_id = ? AND phone = ?",
        )
        .bind(carrier.label())
        .bind(session_id.as_str())
        .bind(phone)
        .execute(&mut *tx)
        .await?;
        updated += result.rows_affected();
    }

    let result = sqlx::query(
        "UPDATE scrape_businesses SET carrier = ?
         WHERE session_id = ? AND (phone IS NULL OR trim(phone) = '')",
    )
    .bind(Carrier::Unknown.label())
    .bind(session_id.as_str())
    .execute(&mut *tx)
    .await?;
    updated += result.rows_affected();

    tx.commit().await?;
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{sessions, Database};
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

    fn record(name: &str, phone: Option<&str>) -> BusinessRecord {
        let mut record = BusinessRecord::new(name, "Alpha", "Pharmacy");
        record.phone = phone.map(str::to_string);
        record.map_url = Some(format!("https://maps.example/{name}"));
        record
    }

    #[tokio::test]
    async fn test_insert_and_get_businesses() {
        let (db, id) = setup_session().await;
        let records = vec![record("One", Some("0101234567")), record("Two", None)];

        let inserted = insert_businesses(db.pool(), &id, &records)
            .await
            .expect("insert");
        assert_eq!(inserted, 2);

        let loaded = get_businesses(db.pool(), &id).await.expect("get");
        assert_eq!(loaded, records);
        assert_eq!(count_businesses(db.pool(), &id).await.expect("count"), 2);
    }

    #[tokio::test]
    async fn test_blank_town_rejected_and_rolled_back() {
        let (db, id) = setup_session().await;
        let mut bad = record("Bad", None);
        bad.town = String::new();

        let result = insert_businesses(db.pool(), &id, &[record("Good", None), bad]).await;
        assert!(result.is_err());
        assert_eq!(count_businesses(db.pool(), &id).await.expect("count"), 0);
    }

    #[tokio::test]
    async fn test_apply_carriers() {
        let (db, id) = setup_session().await;
        insert_businesses(
            db.pool(),
            &id,
            &[
                record("One", Some("0101234567")),
                record("Two", Some("0129999999")),
                record("Three", None),
            ],
        )
        .await
        .expect("insert");

        let mut carriers = HashMap::new();
        carriers.insert("0101234567".to_string(), Carrier::Named("Vodafone".into()));
        carriers.insert("0129999999".to_string(), Carrier::Unknown);

        let updated = apply_carriers(db.pool(), &id, &carriers)
            .await
            .expect("apply carriers");
        assert_eq!(updated, 3);

        let loaded = get_businesses(db.pool(), &id).await.expect("get");
        assert_eq!(loaded[0].carrier, Carrier::Named("Vodafone".into()));
        assert_eq!(loaded[1].carrier, Carrier::Unknown);
        assert_eq!(loaded[2].carrier, Carrier::Unknown);
    }

    #[tokio::test]
    async fn test_delete_town_businesses_keeps_other_towns() {
        let (db, id) = setup_session().await;
        let mut beta = record("Beta Cafe", None);
        beta.town = "Beta".to_string();
        insert_businesses(db.pool(), &id, &[record("One", None), record("Two", None), beta.clone()])
            .await
            .expect("insert");

        let deleted = delete_town_businesses(db.pool(), &id, &["Alpha".to_string()])
            .await
            .expect("delete");
        assert_eq!(deleted, 2);
        assert_eq!(get_businesses(db.pool(), &id).await.expect("get"), vec![beta]);

        let none = delete_town_businesses(db.pool(), &id, &[])
            .await
            .expect("delete nothing");
        assert_eq!(none, 0);
    }

    #[tokio::test]
    async fn test_businesses_cascade_with_session() {
        let (db, id) = setup_session().await;
        insert_businesses(db.pool(), &id, &[record("One", None)])
            .await
            .expect("insert");

        sessions::delete_session(db.pool(), &id)
            .await
            .expect("delete session");
        assert_eq!(count_businesses(db.pool(), &id).await.expect("count"), 0);
    }
}
