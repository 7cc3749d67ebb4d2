//! Browser session seams used by scrape workers.
//!
//! A worker asks a [`BrowserLauncher`] for a [`SearchSession`] when it starts a
//! town and closes the session when the town is done. The Chromium
//! implementation runs each search in its own page of one shared browser.

use crate::actions::BrowserActions;
use crate::engine::BrowserEngine;
use crate::error::{BrowserError, Result};
use crate::parser::{ListingParser, RawListing};
use crate::url_builder::build_search_url;
use async_trait::async_trait;
use leadscrape_core::BrowserConfig;
use std::sync::Arc;
use std::time::Duration;

/// Creates browser sessions.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Start a browser. A failure here is worker-fatal for the current town.
    async fn launch(&self) -> Result<Arc<dyn SearchSession>>;
}

/// A live browser able to run map searches concurrently.
#[async_trait]
pub trait SearchSession: Send + Sync {
    /// Search one industry within one town and return the listings found.
    async fn search(&self, town: &str, industry: &str) -> Result<Vec<RawListing>>;

    /// Tear the browser down.
    async fn close(&self) -> Result<()>;
}

/// Launches headless Chromium through `chromiumoxide`.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    config: BrowserConfig,
}

impl ChromiumLauncher {
    pub fn new(config: BrowserConfig) -> Result<Self> {
        // Fail fast on bad selectors instead of on the first town.
        ListingParser::new(&config.selectors, config.base_url.clone())?;
        Ok(Self { config })
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Arc<dyn SearchSession>> {
        let engine = BrowserEngine::launch(&self.config).await?;
        let parser = ListingParser::new(&self.config.selectors, self.config.base_url.clone())?;
        Ok(Arc::new(ChromiumSearchSession {
            engine,
            parser,
            config: self.config.clone(),
        }))
    }
}

struct ChromiumSearchSession {
    engine: BrowserEngine,
    parser: ListingParser,
    config: BrowserConfig,
}

impl ChromiumSearchSession {
    async fn run_search<P: BrowserActions + Sync>(&self, page: &P, url: &str) -> Result<String> {
        let timeout = self.engine.navigation_timeout();
        page.navigate(url, timeout).await?;

        let selectors = &self.config.selectors;
        let mut waits = vec![selectors.feed.as_str()];
        if let Some(no_results) = selectors.no_results.as_deref() {
            waits.push(no_results);
        }
        if page.wait_for_any(&waits, timeout).await? == 1 {
            return page.html().await;
        }

        // Results render lazily; scroll until the count stops growing.
        let pause = Duration::from_millis(self.config.scroll_pause_ms);
        let mut previous = page.count_elements(&selectors.item).await?;
        for _ in 0..self.config.max_scroll_rounds {
            page.scroll_to_end(&selectors.feed).await?;
            tokio::time::sleep(pause).await;
            let current = page.count_elements(&selectors.item).await?;
            if current <= previous {
                break;
            }
            previous = current;
        }

        page.html().await
    }
}

#[async_trait]
impl SearchSession for ChromiumSearchSession {
    async fn search(&self, town: &str, industry: &str) -> Result<Vec<RawListing>> {
        let url = build_search_url(&self.config.search_url_template, town, industry)?;
        tracing::debug!(town = %town, industry = %industry, url = %url, "Searching");

        let page = self.engine.new_page().await?;
        let html = self.run_search(&page, &url).await;
        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close search page: {}", e);
        }

        let html = html?;
        if html.trim().is_empty() {
            return Err(BrowserError::Extraction(format!(
                "empty document for {industry} in {town}"
            )));
        }
        Ok(self.parser.parse(&html))
    }

    async fn close(&self) -> Result<()> {
        self.engine.close().await
    }
}
