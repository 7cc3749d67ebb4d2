//! Configuration management for Leadscrape.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

/// Main application configuration.
///
/// This is loaded from `~/.config/leadscrape/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Scrape session defaults
    pub scraping: ScrapingConfig,
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Carrier lookup settings
    pub lookup: LookupConfig,
    /// Database location
    pub storage: StorageConfig,
    /// Spreadsheet export settings
    pub export: ExportConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, using defaults when it is absent.
    pub fn load_from(config_path: &std::path::Path) -> ConfigResult<Self> {
        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(config_path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LEADSCRAPE_HEADLESS`: Override browser headless mode (true/false)
    /// - `LEADSCRAPE_SIMULTANEOUS_TOWNS`: Override the worker-pool size
    /// - `LEADSCRAPE_LOOKUP_ENABLED`: Override carrier lookup (true/false)
    /// - `LEADSCRAPE_DATABASE_PATH`: Override the database file location
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Apply `LEADSCRAPE_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("LEADSCRAPE_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("LEADSCRAPE_SIMULTANEOUS_TOWNS") {
            if let Ok(towns) = val.parse() {
                self.scraping.simultaneous_towns = towns;
                tracing::debug!("Override scraping.simultaneous_towns from env: {}", towns);
            }
        }

        if let Ok(val) = std::env::var("LEADSCRAPE_LOOKUP_ENABLED") {
            if let Ok(enabled) = val.parse() {
                self.scraping.lookup_enabled = enabled;
                tracing::debug!("Override scraping.lookup_enabled from env: {}", enabled);
            }
        }

        if let Ok(val) = std::env::var("LEADSCRAPE_DATABASE_PATH") {
            if !val.is_empty() {
                tracing::debug!("Override storage.database_path from env: {}", val);
                self.storage.database_path = Some(PathBuf::from(val));
            }
        }
    }

    /// Reject values that would make the scraper misbehave at runtime.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.lookup.requests_per_second <= 0.0 {
            return Err(ConfigError::InvalidValue {
                field: "lookup.requests_per_second".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.lookup.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lookup.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.lookup.base_backoff_ms > self.lookup.max_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "lookup.base_backoff_ms".to_string(),
                reason: "must not exceed lookup.max_backoff_ms".to_string(),
            });
        }
        if self.scraping.max_town_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "scraping.max_town_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if !self.browser.search_url_template.contains("{query}") {
            return Err(ConfigError::InvalidValue {
                field: "browser.search_url_template".to_string(),
                reason: "must contain a {query} placeholder".to_string(),
            });
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leadscrape/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leadscrape`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(project_dirs()?.data_dir().to_path_buf())
    }

    /// Resolve the database file, defaulting to `<data_dir>/leadscrape.db`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("leadscrape.db")),
        }
    }
}

fn project_dirs() -> ConfigResult<ProjectDirs> {
    ProjectDirs::from("com", "leadscrape", "leadscrape").ok_or(ConfigError::NoConfigDir)
}

/// Defaults for new scrape sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScrapingConfig {
    /// Towns processed at once (1-5)
    pub simultaneous_towns: u8,
    /// Industry scrapes per browser (1-3)
    pub simultaneous_industries: u8,
    /// Carrier lookup lanes (1-3)
    pub simultaneous_lookups: u8,
    /// Run the carrier lookup phase after extraction
    pub lookup_enabled: bool,
    /// Attempts per town when the browser fails to start
    pub max_town_attempts: u32,
    /// Attempts per (town, industry) pair on navigation failures
    pub max_industry_attempts: u32,
    /// Close each worker's browser after every town to bound memory growth
    pub teardown_browser_per_town: bool,
}

impl Default for ScrapingConfig {
    fn default() -> Self {
        Self {
            simultaneous_towns: 2,
            simultaneous_industries: 2,
            simultaneous_lookups: 2,
            lookup_enabled: true,
            max_town_attempts: 3,
            max_industry_attempts: 2,
            teardown_browser_per_town: true,
        }
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Navigation timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Search URL with a `{query}` placeholder
    pub search_url_template: String,
    /// Base URL used to resolve relative listing links
    pub base_url: String,
    /// Times the result feed is scrolled to load more listings
    pub max_scroll_rounds: u32,
    /// Pause between scroll rounds in milliseconds
    pub scroll_pause_ms: u64,
    /// CSS selectors for the result list
    pub selectors: ListingSelectors,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1366,
            window_height: 900,
            navigation_timeout_secs: 30,
            search_url_template: "https://www.google.com/maps/search/{query}".to_string(),
            base_url: "https://www.google.com".to_string(),
            max_scroll_rounds: 8,
            scroll_pause_ms: 1200,
            selectors: ListingSelectors::default(),
        }
    }
}

/// CSS selectors describing a map provider's result list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSelectors {
    /// Scrollable container holding the results
    pub feed: String,
    /// One result entry
    pub item: String,
    /// Business name within an entry
    pub name: String,
    /// Anchor carrying the map link
    pub link: String,
    /// Phone number within an entry
    pub phone: Option<String>,
    /// Address line within an entry
    pub address: Option<String>,
    /// Category label within an entry
    pub category: Option<String>,
    /// Element shown when the search has no results
    pub no_results: Option<String>,
}

impl Default for ListingSelectors {
    fn default() -> Self {
        Self {
            feed: "div[role='feed']".to_string(),
            item: "div[role='feed'] div[role='article']".to_string(),
            name: ".qBF1Pd".to_string(),
            link: "a.hfpxzc".to_string(),
            phone: Some(".UsdlK".to_string()),
            address: Some(".W4Efsd > span:last-child > span:last-child".to_string()),
            category: Some(".W4Efsd > span:first-child > span".to_string()),
            no_results: Some(".Q2vNVc".to_string()),
        }
    }
}

/// Carrier lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Maximum external lookups per second across all lanes
    pub requests_per_second: f64,
    /// Attempts per lookup before giving up
    pub max_attempts: u32,
    /// First retry delay in milliseconds
    pub base_backoff_ms: u64,
    /// Retry delay ceiling in milliseconds
    pub max_backoff_ms: u64,
    /// Country calling code stripped during normalization
    pub country_code: String,
    /// HTTP carrier API; when unset the prefix table is used
    pub endpoint: Option<String>,
    /// Request timeout for the HTTP carrier API in seconds
    pub timeout_secs: u64,
    /// National number prefix -> carrier name
    pub prefixes: BTreeMap<String, String>,
}

impl Default for LookupConfig {
    fn default() -> Self {
        let prefixes = [
            ("010", "Vodafone"),
            ("011", "Etisalat"),
            ("012", "Orange"),
            ("015", "WE"),
        ]
        .into_iter()
        .map(|(prefix, carrier)| (prefix.to_string(), carrier.to_string()))
        .collect();

        Self {
            requests_per_second: 1.0,
            max_attempts: 4,
            base_backoff_ms: 1000,
            max_backoff_ms: 30_000,
            country_code: "20".to_string(),
            endpoint: None,
            timeout_secs: 15,
            prefixes,
        }
    }
}

/// Database location.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; defaults to the data directory
    pub database_path: Option<PathBuf>,
}

/// Spreadsheet export settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Directory for exported workbooks; defaults to the working directory
    pub output_dir: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scraping.simultaneous_towns, 2);
        assert_eq!(config.scraping.max_town_attempts, 3);
        assert!(config.scraping.teardown_browser_per_town);
        assert!(config.browser.headless);
        assert!((config.lookup.requests_per_second - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.lookup.max_backoff_ms, 30_000);
        assert_eq!(config.lookup.prefixes.get("012").map(String::as_str), Some("Orange"));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scraping]"));
        assert!(toml_str.contains("[browser]"));
        assert!(toml_str.contains("[lookup]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(
            parsed.browser.search_url_template,
            config.browser.search_url_template
        );
        assert_eq!(parsed.browser.selectors, config.browser.selectors);
    }

    #[test]
    fn test_config_load_from_file() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.scraping.simultaneous_towns = 4;
        config.lookup.country_code = "44".to_string();

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.scraping.simultaneous_towns, 4);
        assert_eq!(loaded.lookup.country_code, "44");
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load defaults");
        assert_eq!(loaded.scraping.simultaneous_lookups, 2);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[scraping]
simultaneous_towns = 5

[lookup]
requests_per_second = 0.5
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.scraping.simultaneous_towns, 5);
        assert!((config.lookup.requests_per_second - 0.5).abs() < f64::EPSILON);
        // These should be defaults
        assert_eq!(config.scraping.simultaneous_industries, 2);
        assert!(config.browser.headless);
        assert_eq!(config.lookup.max_attempts, 4);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.lookup.requests_per_second = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.lookup.base_backoff_ms = 60_000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.browser.search_url_template = "https://maps.example.com/search".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("search_url_template"));
    }

    #[test]
    fn test_database_path_override() {
        let mut config = AppConfig::default();
        config.storage.database_path = Some(PathBuf::from("/tmp/leads.db"));
        assert_eq!(
            config.database_path().expect("database path"),
            PathBuf::from("/tmp/leads.db")
        );
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("LEADSCRAPE_HEADLESS", "false");
        std::env::set_var("LEADSCRAPE_SIMULTANEOUS_TOWNS", "3");
        std::env::set_var("LEADSCRAPE_LOOKUP_ENABLED", "false");

        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert!(!config.browser.headless);
        assert_eq!(config.scraping.simultaneous_towns, 3);
        assert!(!config.scraping.lookup_enabled);

        std::env::remove_var("LEADSCRAPE_HEADLESS");
        std::env::remove_var("LEADSCRAPE_SIMULTANEOUS_TOWNS");
        std::env::remove_var("LEADSCRAPE_LOOKUP_ENABLED");
    }
}
