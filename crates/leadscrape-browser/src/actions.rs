use crate::error::{BrowserError, Result};
use chromiumoxide::Page;
use std::time::Duration;

const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Page interactions needed to load a map-search result list.
#[async_trait::async_trait]
pub trait BrowserActions {
    /// Navigate to a URL, failing after `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until one of `selectors` matches; returns the index of the first match.
    async fn wait_for_any(&self, selectors: &[&str], timeout: Duration) -> Result<usize>;

    /// Number of elements matching a selector.
    async fn count_elements(&self, selector: &str) -> Result<usize>;

    /// Scroll a container to its end so lazily rendered entries load.
    async fn scroll_to_end(&self, selector: &str) -> Result<()>;

    /// Current document HTML.
    async fn html(&self) -> Result<String>;
}

#[async_trait::async_trait]
impl BrowserActions for Page {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("navigating to {url}")))?
            .map_err(|e| BrowserError::NavigationError(format!("{url}: {e}")))?;
        Ok(())
    }

    async fn wait_for_any(&self, selectors: &[&str], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (idx, selector) in selectors.iter().enumerate() {
                if self.count_elements(selector).await? > 0 {
                    return Ok(idx);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::SelectorNotFound(selectors.join(" | ")));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn count_elements(&self, selector: &str) -> Result<usize> {
        let script = format!(
            "document.querySelectorAll({}).length",
            js_string(selector)?
        );
        self.evaluate(script)
            .await?
            .into_value::<usize>()
            .map_err(|e| BrowserError::Extraction(e.to_string()))
    }

    async fn scroll_to_end(&self, selector: &str) -> Result<()> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); if (!el) return false; el.scrollTop = el.scrollHeight; return true; }})()",
            js_string(selector)?
        );
        let found = self
            .evaluate(script)
            .await?
            .into_value::<bool>()
            .map_err(|e| BrowserError::Extraction(e.to_string()))?;
        if found {
            Ok(())
        } else {
            Err(BrowserError::SelectorNotFound(selector.to_string()))
        }
    }

    async fn html(&self) -> Result<String> {
        Ok(self.content().await?)
    }
}

/// Quote a value as a JavaScript string literal.
fn js_string(value: &str) -> Result<String> {
    serde_json::to_string(value).map_err(|e| BrowserError::Extraction(e.to_string()))
}
