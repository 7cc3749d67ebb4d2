use leadscrape_core::{SessionId, SessionStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("session {0} not found")]
    SessionNotFound(SessionId),

    #[error("cannot {action} session {session_id} while it is {status}")]
    InvalidState {
        session_id: SessionId,
        status: SessionStatus,
        action: &'static str,
    },

    #[error("session {0} is still running")]
    SessionActive(SessionId),

    #[error("invalid configuration: {0}")]
    Config(#[from] leadscrape_core::LeadscrapeError),

    #[error("checkpoint unreadable: {0}")]
    Checkpoint(String),

    #[error("unsupported checkpoint version {found} (newest supported: {supported})")]
    UnsupportedCheckpointVersion { found: u32, supported: u32 },

    #[error("storage error: {0}")]
    Storage(#[from] leadscrape_db::DatabaseError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("browser error: {0}")]
    Browser(#[from] leadscrape_browser::BrowserError),

    #[error("export failed: {0}")]
    Export(#[from] rust_xlsxwriter::XlsxError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("session task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Checkpoint(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ScrapeError>;
