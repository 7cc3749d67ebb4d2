//! Browser automation for map-search extraction.
//!
//! Provides headless Chromium control with per-launch fingerprinting, the
//! result-list parser, and the launcher/session seams workers depend on.

pub mod actions;
pub mod engine;
pub mod error;
pub mod fingerprint;
pub mod parser;
pub mod session;
pub mod url_builder;

pub use actions::BrowserActions;
pub use engine::BrowserEngine;
pub use error::{BrowserError, Result};
pub use parser::{ListingParser, RawListing};
pub use session::{BrowserLauncher, ChromiumLauncher, SearchSession};
pub use url_builder::build_search_url;
