//! Core error types for the Leadscrape workspace.
//!
//! Subsystem crates define their own error enums; this one covers shared
//! types, validation, and configuration loading.

use thiserror::Error;

/// Central error type for shared Leadscrape operations.
#[derive(Error, Debug)]
pub enum LeadscrapeError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Rejected input: malformed session ids, empty town or industry lists,
    /// concurrency settings out of bounds
    #[error("validation error: {0}")]
    Validation(String),
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to determine config directory path
    #[error("could not determine config directory (XDG base directories not available)")]
    NoConfigDir,

    /// Failed to parse TOML
    #[error("failed to parse config TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Failed to serialize config
    #[error("failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// I/O error reading/writing config
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid configuration value
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for invalidity
        reason: String,
    },
}

/// Result type alias using `LeadscrapeError`.
pub type Result<T> = std::result::Result<T, LeadscrapeError>;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = LeadscrapeError::Validation("simultaneous_towns out of range".to_string());
        assert_eq!(
            err.to_string(),
            "validation error: simultaneous_towns out of range"
        );

        let err = ConfigError::NoConfigDir;
        assert_eq!(
            err.to_string(),
            "could not determine config directory (XDG base directories not available)"
        );
    }

    #[test]
    fn test_error_from_config() {
        let config_err = ConfigError::InvalidValue {
            field: "lookup.requests_per_second".to_string(),
            reason: "must be positive".to_string(),
        };
        let err: LeadscrapeError = config_err.into();
        assert!(matches!(err, LeadscrapeError::Config(_)));
        assert!(err.to_string().contains("lookup.requests_per_second"));
    }
}
