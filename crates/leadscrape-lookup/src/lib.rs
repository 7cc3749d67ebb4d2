//! Telecom carrier lookup for scraped phone numbers.
//!
//! All external lookups go through one shared [`RateLimiter`], which paces
//! calls across lanes and retries transient failures with capped exponential
//! backoff. Results are cached by normalized number.
//!
//! # Example
//!
//! ```rust,no_run
//! use leadscrape_core::LookupConfig;
//! use leadscrape_lookup::{MemoryCache, PrefixTable, ProviderLookupService, RateLimiter};
//! use std::sync::Arc;
//!
//! # async fn example() {
//! let config = LookupConfig::default();
//! let service = ProviderLookupService::new(
//!     Arc::new(PrefixTable::new(&config.prefixes)),
//!     Arc::new(MemoryCache::new()),
//!     Arc::new(RateLimiter::from_config(&config)),
//!     config.country_code.clone(),
//! )
//! .with_lanes(2);
//!
//! let found = service.identify_carrier("0111234567").await;
//! # let _ = found;
//! # }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod cache;
pub mod error;
pub mod normalize;
pub mod rate_limiter;
pub mod service;

pub use backend::{
    backend_from_config, CarrierBackend, CarrierMatch, HttpCarrierBackend, PrefixTable,
};
pub use cache::{CarrierCache, MemoryCache, SqliteCarrierCache};
pub use error::{LookupError, Result};
pub use normalize::normalize_phone;
pub use rate_limiter::{RateLimiter, RetryPolicy, Retryable, ScheduleError};
pub use service::{BatchLookup, LookupResult, ProviderLookupService};
