//! Lookup error types.

use crate::rate_limiter::Retryable;
use thiserror::Error;

/// Errors raised by carrier backends and caches.
#[derive(Debug, Clone, Error)]
pub enum LookupError {
    /// The backend did not answer in time.
    #[error("lookup timed out: {0}")]
    Timeout(String),

    /// The backend answered with an error status.
    #[error("carrier API returned HTTP {status}: {message}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The request could not be sent.
    #[error("request failed: {0}")]
    Request(String),

    /// The backend answered with something that is not a carrier result.
    #[error("invalid carrier response: {0}")]
    InvalidResponse(String),

    /// The input cannot be normalized to a phone number.
    #[error("invalid phone number: {0}")]
    InvalidNumber(String),

    /// The carrier cache failed.
    #[error("cache error: {0}")]
    Cache(String),
}

impl Retryable for LookupError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) | Self::Request(_) => true,
            Self::Http { status, .. } => *status == 429 || *status >= 500,
            Self::InvalidResponse(_) | Self::InvalidNumber(_) | Self::Cache(_) => false,
        }
    }
}

impl From<reqwest::Error> for LookupError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(err.to_string())
        } else if let Some(status) = err.status() {
            Self::Http {
                status: status.as_u16(),
                message: err.to_string(),
            }
        } else if err.is_decode() {
            Self::InvalidResponse(err.to_string())
        } else {
            Self::Request(err.to_string())
        }
    }
}

impl From<sqlx::Error> for LookupError {
    fn from(err: sqlx::Error) -> Self {
        Self::Cache(err.to_string())
    }
}

/// Result type alias for lookup operations.
pub type Result<T> = std::result::Result<T, LookupError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(LookupError::Timeout("slow".into()).is_retryable());
        assert!(LookupError::Request("connection reset".into()).is_retryable());
        assert!(LookupError::Http {
            status: 429,
            message: "slow down".into()
        }
        .is_retryable());
        assert!(LookupError::Http {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!LookupError::Http {
            status: 400,
            message: "bad number".into()
        }
        .is_retryable());
        assert!(!LookupError::InvalidResponse("not json".into()).is_retryable());
    }
}
