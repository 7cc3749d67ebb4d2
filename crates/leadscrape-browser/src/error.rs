use thiserror::Error;

pub type Result<T> = std::result::Result<T, BrowserError>;

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("chromium error: {0}")]
    ChromiumError(String),

    #[error("navigation failed: {0}")]
    NavigationError(String),

    #[error("selector not found: {0}")]
    SelectorNotFound(String),

    #[error("invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("browser session closed")]
    Closed,
}

impl BrowserError {
    /// Failures that happened before or while loading a results page.
    ///
    /// The caller files these as navigation retries; everything else that
    /// reaches a worker is an extraction problem.
    #[must_use]
    pub fn is_navigation(&self) -> bool {
        matches!(
            self,
            Self::NavigationError(_) | Self::Timeout(_) | Self::ChromiumError(_)
        )
    }

    /// Worth retrying against the same browser session.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NavigationError(_) | Self::Timeout(_) | Self::SelectorNotFound(_)
        )
    }
}

impl From<chromiumoxide::error::CdpError> for BrowserError {
    fn from(err: chromiumoxide::error::CdpError) -> Self {
        match err {
            chromiumoxide::error::CdpError::Timeout => Self::Timeout(err.to_string()),
            other => Self::ChromiumError(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BrowserError::NavigationError("page not found".to_string());
        assert_eq!(err.to_string(), "navigation failed: page not found");
    }

    #[test]
    fn test_invalid_selector_display() {
        let err = BrowserError::InvalidSelector {
            selector: "div[".to_string(),
            reason: "unexpected end".to_string(),
        };
        assert!(err.to_string().contains("div["));
    }

    #[test]
    fn test_classification() {
        assert!(BrowserError::Timeout("feed".into()).is_navigation());
        assert!(BrowserError::Timeout("feed".into()).is_transient());
        assert!(!BrowserError::Extraction("bad html".into()).is_navigation());
        assert!(!BrowserError::Launch("no chrome".into()).is_transient());
        assert!(!BrowserError::Closed.is_transient());
    }
}
