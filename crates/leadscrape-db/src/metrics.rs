//! Append-only scraper metrics.
//!
//! Rows are written once and never updated, so the table has no
//! `updated_at` column.

use crate::error::{DatabaseError, Result};
use crate::{format_timestamp, parse_timestamp};
use chrono::{DateTime, Utc};
use leadscrape_core::SessionId;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Row, Sqlite};
use std::fmt;
use std::str::FromStr;

/// Metric family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Page navigation timings
    Navigation,
    /// Listing extraction counts
    Extraction,
    /// Carrier lookup outcomes
    Lookup,
    /// Process memory samples
    Memory,
}

impl MetricKind {
    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Navigation => "navigation",
            Self::Extraction => "extraction",
            Self::Lookup => "lookup",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "navigation" => Ok(Self::Navigation),
            "extraction" => Ok(Self::Extraction),
            "lookup" => Ok(Self::Lookup),
            "memory" => Ok(Self::Memory),
            other => Err(DatabaseError::Validation(format!(
                "invalid metric kind '{other}'"
            ))),
        }
    }
}

/// A recorded metric.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricRow {
    /// Metric family
    pub kind: MetricKind,
    /// Metric name within the family, e.g. `elapsed_ms`
    pub name: String,
    /// Measured value
    pub value: f64,
    /// When it was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Append a metric row.
///
/// # Errors
/// Returns `DatabaseError::Validation` for a non-finite value or an empty name,
/// or `DatabaseError::Sqlx` if the insert fails.
pub async fn record_metric(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    kind: MetricKind,
    name: &str,
    value: f64,
) -> Result<()> {
    if name.trim().is_empty() {
        return Err(DatabaseError::Validation("metric name is empty".to_string()));
    }
    if !value.is_finite() {
        return Err(DatabaseError::Validation(format!(
            "metric '{name}' has non-finite value"
        )));
    }

    sqlx::query(
        "INSERT INTO scraper_metrics (session_id, kind, name, value, recorded_at)
         VALUES (?, ?, ?, ?, ?)",
    )
    .bind(session_id.as_str())
    .bind(kind.as_str())
    .bind(name)
    .bind(value)
    .bind(format_timestamp(Utc::now()))
    .execute(pool)
    .await?;

    Ok(())
}

/// Get the metrics of a session in recording order, optionally of one kind.
///
/// # Errors
/// Returns `DatabaseError` if the query fails or a row cannot be decoded.
pub async fn get_metrics(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    kind: Option<MetricKind>,
) -> Result<Vec<MetricRow>> {
    let rows = sqlx::query(
        "SELECT kind, name, value, recorded_at FROM scraper_metrics
         WHERE session_id = ? AND (? IS NULL OR kind = ?)
         ORDER BY id ASC",
    )
    .bind(session_id.as_str())
    .bind(kind.map(MetricKind::as_str))
    .bind(kind.map(MetricKind::as_str))
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| -> Result<MetricRow> {
            let kind: String = row.try_get("kind")?;
            let recorded_at: String = row.try_get("recorded_at")?;
            Ok(MetricRow {
                kind: kind
                    .parse()
                    .map_err(|e: DatabaseError| DatabaseError::Decode(e.to_string()))?,
                name: row.try_get("name")?,
                value: row.try_get("value")?,
                recorded_at: parse_timestamp(&recorded_at)?,
            })
        })
        .collect()
}

/// Sum of one named metric across a session.
///
/// # Errors
/// Returns `DatabaseError` if the query fails.
pub async fn sum_metric(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    kind: MetricKind,
    name: &str,
) -> Result<f64> {
    let total: Option<f64> = sqlx::query_scalar(
        "SELECT SUM(value) FROM scraper_metrics WHERE session_id = ? AND kind = ? AND name = ?",
    )
    .bind(session_id.as_str())
    .bind(kind.as_str())
    .bind(name)
    .fetch_one(pool)
    .await?;
    Ok(total.unwrap_or(0.0))
}
