//! Application state shared by every command.

use anyhow::Context;
use leadscrape_browser::ChromiumLauncher;
use leadscrape_core::AppConfig;
use leadscrape_db::Database;
use leadscrape_lookup::{backend_from_config, ProviderLookupService, RateLimiter, SqliteCarrierCache};
use leadscrape_scraper::ScrapingOrchestrator;
use std::path::Path;
use std::sync::Arc;

pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
    pub orchestrator: ScrapingOrchestrator,
}

impl AppState {
    /// Load configuration, open the database and wire the orchestrator.
    ///
    /// Building the launcher only validates selectors; Chrome starts when a
    /// worker first needs it.
    pub async fn new(config_path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match config_path {
            Some(path) => AppConfig::load_from(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => AppConfig::load().context("loading config")?,
        };
        config.apply_env_overrides();
        config.validate().context("invalid configuration")?;

        let db_path = config.database_path()?;
        Self::with_config(config, &db_path).await
    }

    pub async fn with_config(config: AppConfig, db_path: &Path) -> anyhow::Result<Self> {
        tracing::info!("Database: {}", db_path.display());
        let db = Database::new(db_path)
            .await
            .with_context(|| format!("opening database {}", db_path.display()))?;
        db.run_migrations().await.context("running migrations")?;

        let launcher = ChromiumLauncher::new(config.browser.clone())?;
        let backend = backend_from_config(&config.lookup)?;
        let lookup = ProviderLookupService::new(
            Arc::from(backend),
            Arc::new(SqliteCarrierCache::new(db.pool().clone())),
            Arc::new(RateLimiter::from_config(&config.lookup)),
            config.lookup.country_code.clone(),
        )
        .with_lanes(usize::from(config.scraping.simultaneous_lookups));

        let orchestrator = ScrapingOrchestrator::new(
            db.pool().clone(),
            Arc::new(launcher),
            Arc::new(lookup),
            config.scraping.clone(),
        );

        Ok(Self {
            config,
            db,
            orchestrator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_state_opens_database_under_data_dir() {
        let dir = tempfile::tempdir().expect("temp dir");
        let db_path = dir.path().join("data").join("leadscrape.db");

        let state = AppState::with_config(AppConfig::default(), &db_path)
            .await
            .expect("state");

        assert!(db_path.exists());
        let sessions = state.orchestrator.sessions().await.expect("sessions");
        assert!(sessions.is_empty());
        state.db.close().await;
    }
}
