//! Versioned checkpoint payloads.
//!
//! The checkpoint row stores two opaque JSON columns. `batch_state` carries
//! the town queue as a [`BatchState`] with an explicit `version`, and
//! `retry_queue` carries the outstanding [`PairFailure`]s of the run.
//! Unversioned payloads written before versioning (a bare `remaining_towns`
//! list) still load; payloads from a newer schema are refused rather than
//! misread.

use crate::error::{Result, ScrapeError};
use leadscrape_core::SessionId;
use leadscrape_db::checkpoints::{self, CheckpointData};
use leadscrape_db::retry_queue::RetryKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{Pool, Sqlite};
use std::collections::BTreeMap;

/// Newest `batch_state` schema this build reads and writes.
pub const BATCH_STATE_VERSION: u32 = 1;

/// Town queue position of a session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchState {
    pub version: u32,
    /// Towns not yet finished, in dispatch order
    pub pending_towns: Vec<String>,
    /// Browser start attempts used per town
    #[serde(default)]
    pub town_attempts: BTreeMap<String, u32>,
    #[serde(default)]
    pub completed_towns: Vec<String>,
    #[serde(default)]
    pub failed_towns: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct LegacyBatchState {
    remaining_towns: Vec<String>,
}

impl BatchState {
    pub fn new(pending_towns: Vec<String>) -> Self {
        Self {
            version: BATCH_STATE_VERSION,
            pending_towns,
            ..Self::default()
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;

        if value.get("version").is_none() {
            let legacy: LegacyBatchState = serde_json::from_value(value).map_err(|e| {
                ScrapeError::Checkpoint(format!("unversioned batch state without towns: {e}"))
            })?;
            return Ok(Self::new(legacy.remaining_towns));
        }

        let version = value
            .get("version")
            .and_then(Value::as_u64)
            .and_then(|v| u32::try_from(v).ok())
            .ok_or_else(|| ScrapeError::Checkpoint("batch state version is not a number".into()))?;
        if version > BATCH_STATE_VERSION {
            return Err(ScrapeError::UnsupportedCheckpointVersion {
                found: version,
                supported: BATCH_STATE_VERSION,
            });
        }

        let mut state: Self = serde_json::from_value(value)?;
        state.version = BATCH_STATE_VERSION;
        Ok(state)
    }
}

/// An industry scrape that failed after its in-worker retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairFailure {
    pub town: String,
    pub industry: String,
    pub kind: RetryKind,
    pub error: String,
}

/// Everything a session needs to continue where it left off.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionCheckpoint {
    pub batch: BatchState,
    pub failures: Vec<PairFailure>,
    pub current_town: Option<String>,
    pub current_industry: Option<String>,
    pub processed_count: u32,
}

impl SessionCheckpoint {
    fn to_data(&self) -> Result<CheckpointData> {
        Ok(CheckpointData {
            current_town: self.current_town.clone(),
            current_industry: self.current_industry.clone(),
            processed_count: self.processed_count,
            retry_queue: serde_json::to_string(&self.failures)?,
            batch_state: self.batch.encode()?,
        })
    }

    fn from_data(data: &CheckpointData) -> Result<Self> {
        let failures = if data.retry_queue.trim().is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&data.retry_queue)?
        };
        Ok(Self {
            batch: BatchState::decode(&data.batch_state)?,
            failures,
            current_town: data.current_town.clone(),
            current_industry: data.current_industry.clone(),
            processed_count: data.processed_count,
        })
    }
}

/// Upsert the checkpoint of a session.
pub async fn save(
    pool: &Pool<Sqlite>,
    session_id: &SessionId,
    checkpoint: &SessionCheckpoint,
) -> Result<()> {
    let row = checkpoints::save_checkpoint(pool, session_id, &checkpoint.to_data()?).await?;
    leadscrape_db::sessions::touch_checkpoint(pool, session_id, row.updated_at).await?;
    Ok(())
}

/// Load the checkpoint of a session, if one was written.
pub async fn load(pool: &Pool<Sqlite>, session_id: &SessionId) -> Result<Option<SessionCheckpoint>> {
    match checkpoints::load_checkpoint(pool, session_id).await? {
        Some(row) => Ok(Some(SessionCheckpoint::from_data(&row.data)?)),
        None => Ok(None),
    }
}
