//! Carrier identification through the cache and the shared rate limiter.

use crate::backend::{CarrierBackend, CarrierMatch};
use crate::cache::CarrierCache;
use crate::error::LookupError;
use crate::normalize::normalize_phone;
use crate::rate_limiter::{RateLimiter, ScheduleError};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of a single carrier lookup.
pub type LookupResult = std::result::Result<CarrierMatch, ScheduleError<LookupError>>;

/// Result of a batch lookup.
#[derive(Debug, Clone, Default)]
pub struct BatchLookup {
    /// Carrier per input phone string, one entry for every input
    pub matches: HashMap<String, CarrierMatch>,
    /// Inputs whose lookup failed after retries; reported as `unknown`
    pub failed: Vec<String>,
}

impl BatchLookup {
    /// Number of inputs resolved to a named carrier.
    pub fn resolved_count(&self) -> usize {
        self.matches
            .values()
            .filter(|m| m.carrier.is_resolved())
            .count()
    }
}

/// Resolves phone numbers to carriers.
///
/// Numbers are normalized first; a cache hit answers without an external
/// call, a miss is scheduled on the shared [`RateLimiter`] and the answer,
/// `unknown` included, is cached before returning.
pub struct ProviderLookupService {
    backend: Arc<dyn CarrierBackend>,
    cache: Arc<dyn CarrierCache>,
    limiter: Arc<RateLimiter>,
    country_code: String,
    lanes: usize,
}

impl ProviderLookupService {
    pub fn new(
        backend: Arc<dyn CarrierBackend>,
        cache: Arc<dyn CarrierCache>,
        limiter: Arc<RateLimiter>,
        country_code: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            cache,
            limiter,
            country_code: country_code.into(),
            lanes: 1,
        }
    }

    /// Concurrent lookup lanes used by batches.
    #[must_use]
    pub fn with_lanes(mut self, lanes: usize) -> Self {
        self.lanes = lanes.max(1);
        self
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Identify the carrier of one phone number.
    ///
    /// Numbers that cannot be normalized resolve to `unknown` without an
    /// external call.
    pub async fn identify_carrier(&self, phone: &str) -> LookupResult {
        match normalize_phone(phone, &self.country_code) {
            Some(key) => self.lookup_key(&key).await,
            None => {
                tracing::debug!("Not a phone number, skipping lookup: {:?}", phone);
                Ok(CarrierMatch::unknown())
            }
        }
    }

    /// Identify carriers for many numbers across the configured lanes.
    ///
    /// Every input appears in the result. Duplicate numbers, in any format,
    /// are looked up once. A failed lookup yields `unknown` for that number
    /// and never aborts the batch.
    pub async fn identify_carrier_batch(&self, phones: &[String]) -> BatchLookup {
        self.identify_carrier_batch_in_lanes(phones, self.lanes).await
    }

    /// [`identify_carrier_batch`](Self::identify_carrier_batch) with an
    /// explicit lane count, for callers whose concurrency is set per session.
    pub async fn identify_carrier_batch_in_lanes(
        &self,
        phones: &[String],
        lanes: usize,
    ) -> BatchLookup {
        let lanes = lanes.max(1);
        let mut batch = BatchLookup::default();
        let mut by_key: HashMap<String, Vec<&String>> = HashMap::new();
        let mut seen = HashSet::new();

        for phone in phones {
            if !seen.insert(phone.as_str()) {
                continue;
            }
            match normalize_phone(phone, &self.country_code) {
                Some(key) => by_key.entry(key).or_default().push(phone),
                None => {
                    batch.matches.insert(phone.clone(), CarrierMatch::unknown());
                }
            }
        }

        tracing::info!(
            "Identifying carriers for {} numbers ({} distinct) across {} lanes",
            seen.len(),
            by_key.len(),
            lanes
        );

        let outcomes: Vec<(String, LookupResult)> = stream::iter(by_key.keys().cloned())
            .map(|key| async move {
                let outcome = self.lookup_key(&key).await;
                (key, outcome)
            })
            .buffer_unordered(lanes)
            .collect()
            .await;

        for (key, outcome) in outcomes {
            let inputs = by_key.get(&key).map(Vec::as_slice).unwrap_or_default();
            let found = match outcome {
                Ok(found) => found,
                Err(e) => {
                    tracing::warn!("Carrier lookup failed for {}: {}", key, e);
                    batch.failed.extend(inputs.iter().map(|p| (*p).clone()));
                    CarrierMatch::unknown()
                }
            };
            for phone in inputs {
                batch.matches.insert((*phone).clone(), found.clone());
            }
        }

        batch.failed.sort();
        batch
    }

    async fn lookup_key(&self, key: &str) -> LookupResult {
        match self.cache.get(key).await {
            Ok(Some(hit)) => {
                tracing::debug!("Carrier cache hit for {}", key);
                return Ok(hit);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!("Carrier cache read failed for {}, looking up: {}", key, e),
        }

        let backend = &self.backend;
        let found = self.limiter.schedule(|| backend.lookup(key)).await?;

        if let Err(e) = self.cache.put(key, &found).await {
            tracing::warn!("Failed to cache carrier for {}: {}", key, e);
        }
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::error::Result;
    use crate::rate_limiter::RetryPolicy;
    use async_trait::async_trait;
    use leadscrape_core::Carrier;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers from a fixed table; numbers starting with `0999` always time out.
    struct FakeBackend {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CarrierBackend for FakeBackend {
        async fn lookup(&self, phone_key: &str) -> Result<CarrierMatch> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if phone_key.starts_with("0999") {
                return Err(LookupError::Timeout("carrier API stalled".into()));
            }
            if phone_key.starts_with("011") {
                Ok(CarrierMatch::named("Etisalat", 0.9))
            } else {
                Ok(CarrierMatch::unknown())
            }
        }

        fn name(&self) -> &str {
            "fake"
        }
    }

    fn service(backend: Arc<FakeBackend>) -> ProviderLookupService {
        let limiter = Arc::new(RateLimiter::new(
            1.0,
            RetryPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30)),
        ));
        ProviderLookupService::new(backend, Arc::new(MemoryCache::new()), limiter, "20")
            .with_lanes(3)
    }

    fn fake() -> Arc<FakeBackend> {
        Arc::new(FakeBackend {
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_lookup_is_served_from_cache() {
        let backend = fake();
        let service = service(backend.clone());

        let first = service.identify_carrier("0111234567").await.expect("lookup");
        assert_eq!(first.carrier, Carrier::Named("Etisalat".to_string()));
        assert_eq!(service.limiter().calls(), 1);

        let second = service.identify_carrier("+20 111 234 567").await.expect("lookup");
        assert_eq!(second, first);
        assert_eq!(service.limiter().calls(), 1);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_number_skips_backend() {
        let backend = fake();
        let service = service(backend.clone());

        let found = service.identify_carrier("n/a").await.expect("lookup");
        assert_eq!(found, CarrierMatch::unknown());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_keeps_every_input_and_survives_failures() {
        let backend = fake();
        let service = service(backend.clone());
        let phones: Vec<String> = [
            "0111234567",
            "+201112345670",
            "0551234567",
            "0999123456",
            "0111234567",
            "",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        let batch = service.identify_carrier_batch(&phones).await;

        assert_eq!(batch.matches.len(), 5);
        assert_eq!(
            batch.matches["0111234567"].carrier,
            Carrier::Named("Etisalat".to_string())
        );
        assert_eq!(batch.matches["0551234567"].carrier, Carrier::Unknown);
        assert_eq!(batch.matches["0999123456"].carrier, Carrier::Unknown);
        assert_eq!(batch.matches[""].carrier, Carrier::Unknown);
        assert_eq!(batch.failed, vec!["0999123456".to_string()]);
        assert_eq!(batch.resolved_count(), 2);

        // three distinct keys succeed once each, the stalled one uses all 3 attempts
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_lookup_is_not_cached() {
        let backend = fake();
        let service = service(backend.clone());

        assert!(service.identify_carrier("0999123456").await.is_err());
        assert!(service.identify_carrier("0999123456").await.is_err());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_result_is_cached() {
        let backend = fake();
        let service = service(backend.clone());

        service.identify_carrier("0551234567").await.expect("lookup");
        service.identify_carrier("0551234567").await.expect("lookup");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }
}
