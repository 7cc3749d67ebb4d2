//! Leadscrape Core - Foundation crate for the Leadscrape workspace.
//!
//! This crate provides shared types, error handling, and configuration
//! management that all other Leadscrape crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Shared domain types (`SessionId`, `ScrapeConfig`, `BusinessRecord`, `Carrier`)
//!
//! # Example
//!
//! ```rust
//! use leadscrape_core::{AppConfig, ScrapeConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let app = AppConfig::default();
//! let config = ScrapeConfig::new(
//!     ["Alpha", "Beta"],
//!     ["Pharmacy", "Cafe"],
//!     app.scraping.simultaneous_towns,
//!     app.scraping.simultaneous_industries,
//!     app.scraping.simultaneous_lookups,
//!     app.scraping.lookup_enabled,
//! )?;
//! assert_eq!(config.pair_count(), 4);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserConfig, ExportConfig, ListingSelectors, LookupConfig, ScrapingConfig,
    StorageConfig,
};
pub use error::{ConfigError, ConfigResult, LeadscrapeError, Result};
pub use types::{
    normalize_address, BusinessRecord, Carrier, ScrapeConfig, SessionId, SessionStatus,
    MAX_SIMULTANEOUS_INDUSTRIES, MAX_SIMULTANEOUS_LOOKUPS, MAX_SIMULTANEOUS_TOWNS,
};
