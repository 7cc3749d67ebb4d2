//! Carrier lookup backends.

use crate::error::{LookupError, Result};
use async_trait::async_trait;
use leadscrape_core::{Carrier, LookupConfig};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Confidence reported for a prefix-table match.
const PREFIX_CONFIDENCE: f64 = 0.6;

/// A carrier assignment and the backend's confidence in it.
#[derive(Debug, Clone, PartialEq)]
pub struct CarrierMatch {
    /// Resolved carrier, or `unknown`
    pub carrier: Carrier,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
}

impl CarrierMatch {
    /// A result for numbers no backend can attribute.
    pub fn unknown() -> Self {
        Self {
            carrier: Carrier::Unknown,
            confidence: 0.0,
        }
    }

    /// A named carrier; confidence is clamped to `[0, 1]`.
    pub fn named(carrier: impl Into<String>, confidence: f64) -> Self {
        Self {
            carrier: Carrier::from(carrier.into()),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Resolves a normalized phone key to a carrier.
///
/// Implementations perform exactly one external request per call; pacing and
/// retries belong to the caller.
#[async_trait]
pub trait CarrierBackend: Send + Sync {
    /// Look up one normalized phone key.
    async fn lookup(&self, phone_key: &str) -> Result<CarrierMatch>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Offline backend matching national number prefixes.
#[derive(Debug, Clone)]
pub struct PrefixTable {
    // Longest prefixes first so the first hit is the most specific one.
    prefixes: Vec<(String, String)>,
}

impl PrefixTable {
    /// Build a table from `prefix -> carrier` pairs.
    pub fn new(prefixes: &BTreeMap<String, String>) -> Self {
        let mut prefixes: Vec<(String, String)> = prefixes
            .iter()
            .filter(|(prefix, carrier)| !prefix.is_empty() && !carrier.trim().is_empty())
            .map(|(prefix, carrier)| (prefix.clone(), carrier.trim().to_string()))
            .collect();
        prefixes.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        Self { prefixes }
    }

    /// Carrier for `phone_key`, if any prefix matches.
    pub fn resolve(&self, phone_key: &str) -> Option<&str> {
        self.prefixes
            .iter()
            .find(|(prefix, _)| phone_key.starts_with(prefix.as_str()))
            .map(|(_, carrier)| carrier.as_str())
    }
}

#[async_trait]
impl CarrierBackend for PrefixTable {
    async fn lookup(&self, phone_key: &str) -> Result<CarrierMatch> {
        Ok(match self.resolve(phone_key) {
            Some(carrier) => CarrierMatch::named(carrier, PREFIX_CONFIDENCE),
            None => CarrierMatch::unknown(),
        })
    }

    fn name(&self) -> &str {
        "prefix-table"
    }
}

#[derive(Debug, Deserialize)]
struct CarrierResponse {
    carrier: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
}

/// Backend calling an HTTP JSON carrier API.
///
/// Sends `GET <endpoint>?number=<key>` and expects
/// `{"carrier": "...", "confidence": 0.9}`. A 404 means the number is not
/// attributable; 429 and 5xx are retryable.
#[derive(Debug, Clone)]
pub struct HttpCarrierBackend {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpCarrierBackend {
    /// Build a backend for `endpoint` with a per-request timeout.
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = url::Url::parse(endpoint)
            .map_err(|e| LookupError::Request(format!("invalid endpoint '{endpoint}': {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LookupError::Request(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    fn request_url(&self, phone_key: &str) -> url::Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("number", phone_key);
        url
    }
}

#[async_trait]
impl CarrierBackend for HttpCarrierBackend {
    async fn lookup(&self, phone_key: &str) -> Result<CarrierMatch> {
        let response = self.client.get(self.request_url(phone_key)).send().await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(CarrierMatch::unknown());
        }
        if !status.is_success() {
            let message = response
                .text()
                .await
                .ok()
                .filter(|body| !body.trim().is_empty())
                .unwrap_or_else(|| status.canonical_reason().unwrap_or("error").to_string());
            return Err(LookupError::Http {
                status: status.as_u16(),
                message,
            });
        }

        let body: CarrierResponse = response
            .json()
            .await
            .map_err(|e| LookupError::InvalidResponse(e.to_string()))?;

        Ok(match body.carrier {
            Some(carrier) if !carrier.trim().is_empty() => {
                let found = CarrierMatch::named(carrier, body.confidence.unwrap_or(1.0));
                if found.carrier.is_resolved() {
                    found
                } else {
                    CarrierMatch::unknown()
                }
            }
            _ => CarrierMatch::unknown(),
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}

/// Backend selected by configuration: the HTTP API when an endpoint is set,
/// otherwise the prefix table.
pub fn backend_from_config(config: &LookupConfig) -> Result<Box<dyn CarrierBackend>> {
    match config.endpoint.as_deref().filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => {
            tracing::info!("Using HTTP carrier backend at {}", endpoint);
            Ok(Box::new(HttpCarrierBackend::new(
                endpoint,
                Duration::from_secs(config.timeout_secs.max(1)),
            )?))
        }
        None => {
            tracing::info!(
                "Using prefix-table carrier backend ({} prefixes)",
                config.prefixes.len()
            );
            Ok(Box::new(PrefixTable::new(&config.prefixes)))
        }
    }
}
