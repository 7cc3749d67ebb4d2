//! Map-search result list parsing.

use crate::error::{BrowserError, Result};
use crate::url_builder::resolve_link;
use leadscrape_core::{normalize_address, ListingSelectors};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One entry of a result list, before it is tied to a (town, industry) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListing {
    pub name: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub category: Option<String>,
    pub map_url: Option<String>,
}

/// Parser for one provider's result list markup.
///
/// Selectors are compiled once, so a parser can be reused for every page a
/// browser session loads.
#[derive(Debug)]
pub struct ListingParser {
    item: Selector,
    name: Selector,
    link: Selector,
    phone: Option<Selector>,
    address: Option<Selector>,
    category: Option<Selector>,
    no_results: Option<Selector>,
    base_url: String,
}

impl ListingParser {
    pub fn new(selectors: &ListingSelectors, base_url: impl Into<String>) -> Result<Self> {
        Ok(Self {
            item: compile(&selectors.item)?,
            name: compile(&selectors.name)?,
            link: compile(&selectors.link)?,
            phone: selectors.phone.as_deref().map(compile).transpose()?,
            address: selectors.address.as_deref().map(compile).transpose()?,
            category: selectors.category.as_deref().map(compile).transpose()?,
            no_results: selectors.no_results.as_deref().map(compile).transpose()?,
            base_url: base_url.into(),
        })
    }

    /// Extract listings from a rendered results page.
    ///
    /// A page showing the provider's "no results" marker yields an empty list.
    /// Entries without a name are skipped; repeated entries are kept once.
    pub fn parse(&self, html: &str) -> Vec<RawListing> {
        let document = Html::parse_document(html);

        if let Some(no_results) = &self.no_results {
            if document.select(no_results).next().is_some() {
                return Vec::new();
            }
        }

        let mut seen = HashSet::new();
        document
            .select(&self.item)
            .filter_map(|item| self.parse_item(&item))
            .filter(|listing| {
                seen.insert((
                    listing.name.to_lowercase(),
                    listing.map_url.clone().unwrap_or_default(),
                ))
            })
            .collect()
    }

    /// Whether the page shows the provider's "no results" marker.
    pub fn is_empty_result(&self, html: &str) -> bool {
        let document = Html::parse_document(html);
        self.no_results
            .as_ref()
            .is_some_and(|sel| document.select(sel).next().is_some())
    }

    fn parse_item(&self, element: &ElementRef) -> Option<RawListing> {
        let link = element.select(&self.link).next();

        let name = first_text(element, &self.name)
            .or_else(|| link.and_then(|a| a.value().attr("aria-label")).map(clean_text))
            .filter(|name| !name.is_empty())?;

        let map_url = link
            .and_then(|a| a.value().attr("href"))
            .and_then(|href| resolve_link(&self.base_url, href));

        Some(RawListing {
            name,
            phone: self
                .phone
                .as_ref()
                .and_then(|sel| first_text(element, sel))
                .filter(|phone| phone.chars().any(|c| c.is_ascii_digit())),
            address: self
                .address
                .as_ref()
                .and_then(|sel| first_text(element, sel))
                .and_then(|raw| normalize_address(&raw)),
            category: self
                .category
                .as_ref()
                .and_then(|sel| first_text(element, sel))
                .filter(|category| !category.is_empty()),
            map_url,
        })
    }
}

fn compile(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| BrowserError::InvalidSelector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

fn first_text(element: &ElementRef, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(|el| clean_text(&el.text().collect::<String>()))
}

fn clean_text(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
