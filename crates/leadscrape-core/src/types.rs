//! Shared types used across the Leadscrape workspace.
//!
//! This module defines the session identifier, the per-session scrape
//! configuration, business records, carrier labels, and the session
//! lifecycle states.

use crate::error::LeadscrapeError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

/// Upper bound on towns processed at the same time.
pub const MAX_SIMULTANEOUS_TOWNS: u8 = 5;

/// Upper bound on industry scrapes sharing one browser.
pub const MAX_SIMULTANEOUS_INDUSTRIES: u8 = 3;

/// Upper bound on concurrent carrier lookup lanes.
pub const MAX_SIMULTANEOUS_LOOKUPS: u8 = 3;

/// Newtype for scrape session identifiers.
///
/// Session IDs must be valid UUIDs (v4 format).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(String);

impl SessionId {
    /// Create a new `SessionId` from a string.
    ///
    /// # Errors
    /// Returns error if the ID is not a valid UUID v4.
    pub fn new(id: impl Into<String>) -> Result<Self, LeadscrapeError> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// Create a new random `SessionId` using UUID v4.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get the inner string value.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> Result<(), LeadscrapeError> {
        static UUID_REGEX: OnceLock<Regex> = OnceLock::new();
        let regex = UUID_REGEX.get_or_init(|| {
            Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-4[0-9a-f]{3}-[89ab][0-9a-f]{3}-[0-9a-f]{12}$")
                .expect("valid regex")
        });

        if regex.is_match(id) {
            Ok(())
        } else {
            Err(LeadscrapeError::Validation(format!(
                "invalid session ID: must be a valid UUID v4, got '{id}'"
            )))
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = LeadscrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Immutable per-session scrape configuration.
///
/// Construct through [`ScrapeConfig::new`] or call [`ScrapeConfig::validate`]
/// after deserializing; both enforce the concurrency bounds that keep the
/// session within the map provider's and lookup provider's rate limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeConfig {
    /// Town names, deduplicated, in submission order
    pub towns: Vec<String>,
    /// Industry categories, deduplicated, in submission order
    pub industries: Vec<String>,
    /// Worker-pool size (towns processed at once), 1-5
    pub simultaneous_towns: u8,
    /// Industry scrapes per worker, 1-3
    pub simultaneous_industries: u8,
    /// Carrier lookup lanes, 1-3
    pub simultaneous_lookups: u8,
    /// Whether the carrier lookup phase runs after extraction
    pub lookup_enabled: bool,
}

impl ScrapeConfig {
    /// Build a validated configuration.
    ///
    /// Names are trimmed, blanks dropped, and duplicates removed while keeping
    /// first-seen order.
    ///
    /// # Errors
    /// Returns `LeadscrapeError::Validation` if no towns or industries remain
    /// or a concurrency setting is out of bounds.
    pub fn new(
        towns: impl IntoIterator<Item = impl Into<String>>,
        industries: impl IntoIterator<Item = impl Into<String>>,
        simultaneous_towns: u8,
        simultaneous_industries: u8,
        simultaneous_lookups: u8,
        lookup_enabled: bool,
    ) -> Result<Self, LeadscrapeError> {
        let config = Self {
            towns: dedupe_names(towns),
            industries: dedupe_names(industries),
            simultaneous_towns,
            simultaneous_industries,
            simultaneous_lookups,
            lookup_enabled,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the configuration invariants.
    ///
    /// # Errors
    /// Returns `LeadscrapeError::Validation` describing the first violation.
    pub fn validate(&self) -> Result<(), LeadscrapeError> {
        if self.towns.is_empty() {
            return Err(LeadscrapeError::Validation(
                "at least one town is required".to_string(),
            ));
        }
        if self.industries.is_empty() {
            return Err(LeadscrapeError::Validation(
                "at least one industry is required".to_string(),
            ));
        }
        check_bound(
            "simultaneous_towns",
            self.simultaneous_towns,
            MAX_SIMULTANEOUS_TOWNS,
        )?;
        check_bound(
            "simultaneous_industries",
            self.simultaneous_industries,
            MAX_SIMULTANEOUS_INDUSTRIES,
        )?;
        check_bound(
            "simultaneous_lookups",
            self.simultaneous_lookups,
            MAX_SIMULTANEOUS_LOOKUPS,
        )?;
        Ok(())
    }

    /// Number of (town, industry) pairs this configuration covers.
    #[must_use]
    pub fn pair_count(&self) -> usize {
        self.towns.len() * self.industries.len()
    }
}

fn check_bound(field: &str, value: u8, max: u8) -> Result<(), LeadscrapeError> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(LeadscrapeError::Validation(format!(
            "{field} must be between 1 and {max}, got {value}"
        )))
    }
}

fn dedupe_names(names: impl IntoIterator<Item = impl Into<String>>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .map(Into::into)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .filter(|name| seen.insert(name.to_lowercase()))
        .collect()
}

/// Telecom carrier label attached to a business record.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Carrier {
    /// Lookup has not run for this record yet
    Unresolved,
    /// Lookup ran but the number could not be attributed
    Unknown,
    /// A resolved carrier name
    Named(String),
}

impl Carrier {
    /// Label as persisted and exported.
    #[must_use]
    pub fn label(&self) -> &str {
        match self {
            Self::Unresolved => "unresolved",
            Self::Unknown => "unknown",
            Self::Named(name) => name,
        }
    }

    /// True once a lookup produced a concrete carrier.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Named(_))
    }
}

impl fmt::Display for Carrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<String> for Carrier {
    fn from(label: String) -> Self {
        let trimmed = label.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("unknown") {
            Self::Unknown
        } else if trimmed.eq_ignore_ascii_case("unresolved") {
            Self::Unresolved
        } else {
            Self::Named(trimmed.to_string())
        }
    }
}

impl From<&str> for Carrier {
    fn from(label: &str) -> Self {
        Self::from(label.to_string())
    }
}

impl From<Carrier> for String {
    fn from(carrier: Carrier) -> Self {
        carrier.label().to_string()
    }
}

/// A business extracted from one (town, industry) search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessRecord {
    /// Business display name
    pub name: String,
    /// Phone number as shown by the provider
    pub phone: Option<String>,
    /// Whitespace-normalized address
    pub address: Option<String>,
    /// Provider's category label for the business
    pub category: Option<String>,
    /// Town that produced this record
    pub town: String,
    /// Industry that produced this record
    pub industry: String,
    /// Link to the provider's map entry
    pub map_url: Option<String>,
    /// Carrier classification of `phone`
    pub carrier: Carrier,
}

impl BusinessRecord {
    /// Create a record for a (town, industry) pair with an unresolved carrier.
    #[must_use]
    pub fn new(name: impl Into<String>, town: impl Into<String>, industry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone: None,
            address: None,
            category: None,
            town: town.into(),
            industry: industry.into(),
            map_url: None,
            carrier: Carrier::Unresolved,
        }
    }
}

/// Collapse runs of whitespace and trim an address line.
#[must_use]
pub fn normalize_address(raw: &str) -> Option<String> {
    let collapsed = raw
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_matches(|c: char| c == ',' || c == '·' || c.is_whitespace())
        .to_string();
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

/// Lifecycle state of a scrape session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created but not started
    Pending,
    /// Workers are processing towns
    Running,
    /// Workers drained and the checkpoint is authoritative for resume
    Paused,
    /// All towns processed (some may have failed)
    Completed,
    /// Operator stopped the session
    Stopped,
    /// Zero towns succeeded or storage became unavailable
    Failed,
}

impl SessionStatus {
    /// Whether the state accepts no further transitions.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Running | Self::Failed)
            | (Self::Running, Self::Paused | Self::Completed | Self::Stopped | Self::Failed)
            | (Self::Paused, Self::Running | Self::Stopped | Self::Failed) => true,
            _ => false,
        }
    }

    /// Storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = LeadscrapeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "stopped" => Ok(Self::Stopped),
            "failed" => Ok(Self::Failed),
            other => Err(LeadscrapeError::Validation(format!(
                "unknown session status '{other}'"
            ))),
        }
    }
}
