use crate::error::{BrowserError, Result};
use crate::fingerprint::FingerprintConfig;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::Page;
use futures::StreamExt;
use leadscrape_core::BrowserConfig;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;

/// One Chromium process plus the task that drives its CDP connection.
///
/// Pages opened from the same engine share the process, which is how a
/// worker runs several industry searches against a single browser.
pub struct BrowserEngine {
    browser: RwLock<Option<Browser>>,
    handler: JoinHandle<()>,
    fingerprint: FingerprintConfig,
    navigation_timeout: Duration,
}

impl BrowserEngine {
    /// Launch a browser configured from the application settings.
    pub async fn launch(config: &BrowserConfig) -> Result<Self> {
        let fingerprint = FingerprintConfig::randomized(config.window_width, config.window_height);
        Self::with_fingerprint(config, fingerprint).await
    }

    /// Launch a browser with a specific fingerprint.
    pub async fn with_fingerprint(
        config: &BrowserConfig,
        fingerprint: FingerprintConfig,
    ) -> Result<Self> {
        let navigation_timeout = Duration::from_secs(config.navigation_timeout_secs);

        let mut builder = ChromeConfig::builder()
            .no_sandbox()
            .window_size(fingerprint.viewport_width, fingerprint.viewport_height)
            .request_timeout(navigation_timeout)
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !config.headless {
            builder = builder.with_head();
        }
        for arg in fingerprint.chrome_args() {
            builder = builder.arg(arg);
        }

        let chrome_config = builder.build().map_err(BrowserError::Launch)?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("Browser handler stopped: {}", e);
                    break;
                }
            }
        });

        tracing::debug!(
            width = fingerprint.viewport_width,
            height = fingerprint.viewport_height,
            headless = config.headless,
            "Browser launched"
        );

        Ok(Self {
            browser: RwLock::new(Some(browser)),
            handler,
            fingerprint,
            navigation_timeout,
        })
    }

    /// Fingerprint this browser presents.
    pub fn fingerprint(&self) -> &FingerprintConfig {
        &self.fingerprint
    }

    /// Timeout applied to each navigation.
    pub fn navigation_timeout(&self) -> Duration {
        self.navigation_timeout
    }

    /// Open a blank page.
    pub async fn new_page(&self) -> Result<Page> {
        let guard = self.browser.read().await;
        let browser = guard.as_ref().ok_or(BrowserError::Closed)?;
        Ok(browser.new_page("about:blank").await?)
    }

    /// Load a URL in a fresh page and return the rendered HTML.
    pub async fn fetch_page_content(&self, url: &str) -> Result<String> {
        let page = self.new_page().await?;
        let result = async {
            tokio::time::timeout(self.navigation_timeout, page.goto(url))
                .await
                .map_err(|_| BrowserError::Timeout(format!("navigating to {url}")))?
                .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
            page.content().await.map_err(BrowserError::from)
        }
        .await;

        if let Err(e) = page.close().await {
            tracing::debug!("Failed to close page: {}", e);
        }
        result
    }

    /// Shut the browser down. Safe to call more than once.
    pub async fn close(&self) -> Result<()> {
        let browser = self.browser.write().await.take();
        if let Some(mut browser) = browser {
            browser.close().await?;
            if let Err(e) = browser.wait().await {
                tracing::debug!("Browser process did not exit cleanly: {}", e);
            }
        }
        self.handler.abort();
        Ok(())
    }

    /// Whether [`close`](Self::close) has run.
    pub async fn is_closed(&self) -> bool {
        self.browser.read().await.is_none()
    }
}

impl Drop for BrowserEngine {
    fn drop(&mut self) {
        self.handler.abort();
    }
}
