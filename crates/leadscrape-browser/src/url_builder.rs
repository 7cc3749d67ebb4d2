use crate::error::{BrowserError, Result};

/// Build the map-search URL for one (town, industry) pair.
///
/// The template's `{query}` placeholder receives `"<industry> in <town>"`,
/// form-encoded so it is safe in either a path segment or a query string.
pub fn build_search_url(template: &str, town: &str, industry: &str) -> Result<String> {
    if !template.contains("{query}") {
        return Err(BrowserError::NavigationError(format!(
            "search URL template has no {{query}} placeholder: {template}"
        )));
    }

    let query = format!("{} in {}", industry.trim(), town.trim());
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    let url = template.replace("{query}", &encoded);

    url::Url::parse(&url)
        .map_err(|e| BrowserError::NavigationError(format!("invalid search URL '{url}': {e}")))?;

    Ok(url)
}

/// Resolve a listing link against the provider's base URL.
pub fn resolve_link(base_url: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    if let Ok(absolute) = url::Url::parse(href) {
        return Some(absolute.to_string());
    }
    url::Url::parse(base_url)
        .and_then(|base| base.join(href))
        .map(|u| u.to_string())
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_from_template() {
        let url = build_search_url(
            "https://www.google.com/maps/search/{query}",
            "Alpha",
            "Pharmacy",
        )
        .expect("should build URL from template");

        assert_eq!(url, "https://www.google.com/maps/search/Pharmacy+in+Alpha");
    }

    #[test]
    fn test_build_url_encodes_special_characters() {
        let url = build_search_url("https://maps.example/?q={query}", "Saint-Denis", "Café & Bar")
            .expect("build url");
        assert_eq!(
            url,
            "https://maps.example/?q=Caf%C3%A9+%26+Bar+in+Saint-Denis"
        );
    }

    #[test]
    fn test_template_without_placeholder_rejected() {
        assert!(build_search_url("https://maps.example/search", "Alpha", "Cafe").is_err());
    }

    #[test]
    fn test_resolve_link() {
        assert_eq!(
            resolve_link("https://www.google.com", "/maps/place/abc").as_deref(),
            Some("https://www.google.com/maps/place/abc")
        );
        assert_eq!(
            resolve_link("https://www.google.com", "https://maps.example/x").as_deref(),
            Some("https://maps.example/x")
        );
        assert_eq!(resolve_link("https://www.google.com", "  "), None);
    }
}
