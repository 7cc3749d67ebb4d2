//! Shared rate limiter with retry and exponential backoff.
//!
//! Every external lookup passes through one [`RateLimiter`], so the aggregate
//! request rate stays bounded however many lanes call it. Callers reserve
//! release slots in FIFO order; a failed attempt waits out its backoff and
//! then queues for a fresh slot like any other call.

use leadscrape_core::LookupConfig;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// Errors that may succeed if tried again.
pub trait Retryable {
    /// Whether another attempt could succeed.
    fn is_retryable(&self) -> bool;
}

/// Final failure of a scheduled operation.
#[derive(Debug, Error)]
pub enum ScheduleError<E: std::fmt::Display> {
    /// Every attempt failed with a retryable error.
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Attempts made
        attempts: u32,
        /// Error of the final attempt
        last_error: E,
    },

    /// An attempt failed with an error that retrying cannot fix.
    #[error("non-retryable failure: {0}")]
    NonRetryable(E),
}

impl<E: std::fmt::Display> ScheduleError<E> {
    /// The underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::RetriesExhausted { last_error, .. } => last_error,
            Self::NonRetryable(e) => e,
        }
    }

    /// Whether the failure came from exhausting the retry budget.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy; at least one attempt is always made.
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: max_delay.max(base_delay),
        }
    }

    /// Policy from the `[lookup]` configuration section.
    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_backoff_ms),
            Duration::from_millis(config.max_backoff_ms),
        )
    }

    /// Delay after failed attempt number `attempt` (1-based).
    ///
    /// Doubles from `base_delay` and is capped at `max_delay`, so the sequence
    /// never decreases.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(4, Duration::from_secs(1), Duration::from_secs(30))
    }
}

/// Releases operations at a fixed maximum rate.
#[derive(Debug)]
pub struct RateLimiter {
    min_interval: Duration,
    next_slot: Mutex<Instant>,
    policy: RetryPolicy,
    calls: AtomicU64,
}

impl RateLimiter {
    /// Limit to `requests_per_second`; a non-positive rate disables pacing.
    pub fn new(requests_per_second: f64, policy: RetryPolicy) -> Self {
        let min_interval = if requests_per_second.is_finite() && requests_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / requests_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            min_interval,
            next_slot: Mutex::new(Instant::now()),
            policy,
            calls: AtomicU64::new(0),
        }
    }

    /// Limiter from the `[lookup]` configuration section.
    pub fn from_config(config: &LookupConfig) -> Self {
        Self::new(config.requests_per_second, RetryPolicy::from_config(config))
    }

    /// Minimum spacing between released operations.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Retry policy applied by [`schedule`](Self::schedule).
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Number of operation attempts released so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    /// Wait for the next release slot.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next).max(now);
            *next = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
        self.calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Run `operation` under the rate limit, retrying retryable failures.
    pub async fn schedule<F, Fut, T, E>(&self, mut operation: F) -> Result<T, ScheduleError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Retryable + std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.acquire().await;

            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => {
                    tracing::debug!("Operation failed with non-retryable error: {}", e);
                    return Err(ScheduleError::NonRetryable(e));
                }
                Err(e) if attempt >= self.policy.max_attempts => {
                    tracing::warn!(
                        "Operation failed after {} attempts (max: {}): {}",
                        attempt,
                        self.policy.max_attempts,
                        e
                    );
                    return Err(ScheduleError::RetriesExhausted {
                        attempts: attempt,
                        last_error: e,
                    });
                }
                Err(e) => {
                    let delay = self.policy.delay_for(attempt);
                    tracing::debug!(
                        "Operation failed on attempt {}/{}, retrying in {:?}: {}",
                        attempt,
                        self.policy.max_attempts,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
