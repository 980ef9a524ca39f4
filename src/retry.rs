//! Retry policy and backoff calculation.
//!
//! [`RetryManager::execute_with_retry`] runs an async operation up to
//! `max_retries + 1` times. The delay between attempts grows exponentially,
//! with a steeper curve for quota and rate-limit errors:
//!
//! | error kind      | multiplier          |
//! |-----------------|---------------------|
//! | `QuotaExceeded` | 4                   |
//! | `RateLimited`   | 3                   |
//! | otherwise       | `exponential_base`  |
//!
//! Permanent errors are returned immediately without retry.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::error::ErrorKind;
use crate::telemetry;
use crate::{HuginnError, Result};

const QUOTA_MULTIPLIER: f64 = 4.0;
const RATE_LIMIT_MULTIPLIER: f64 = 3.0;

/// Backoff parameters.
///
/// ```rust
/// # use huginn::RetryPolicy;
/// # use std::time::Duration;
/// let policy = RetryPolicy::new()
///     .max_retries(5)
///     .base_delay(Duration::from_millis(200))
///     .jitter_fraction(0.0);
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt. 0 = single attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 1s.
    pub base_delay: Duration,
    /// Cap on any single delay. Default: 60s.
    pub max_delay: Duration,
    /// Growth factor for ordinary transient errors. Default: 2.0.
    pub exponential_base: f64,
    /// Symmetric jitter as a fraction of the delay, in `0.0..=1.0`. Default: 0.1.
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            exponential_base: 2.0,
            jitter_fraction: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Values at or below 1.0 are raised to 1.0 (no growth).
    pub fn exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = if base.is_finite() { base.max(1.0) } else { 2.0 };
        self
    }

    /// Clamped to `0.0..=1.0`.
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    /// Growth factor for an error, by kind.
    pub fn multiplier_for(&self, error: Option<&HuginnError>) -> f64 {
        match error.map(HuginnError::kind) {
            Some(ErrorKind::QuotaExceeded) => QUOTA_MULTIPLIER,
            Some(ErrorKind::RateLimited) => RATE_LIMIT_MULTIPLIER,
            _ => self.exponential_base,
        }
    }

    /// Delay before retry number `attempt` (0-indexed), before jitter:
    /// `min(max_delay, base_delay * multiplier^attempt)`.
    pub fn backoff(&self, attempt: u32, last_error: Option<&HuginnError>) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.multiplier_for(last_error).powi(exponent);
        // Overflow to infinity just means "as long as allowed".
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Backoff with symmetric jitter applied, clamped to non-negative.
    pub fn calculate_delay(&self, attempt: u32, last_error: Option<&HuginnError>) -> Duration {
        let delay = self.backoff(attempt, last_error);
        if self.jitter_fraction <= 0.0 || delay.is_zero() {
            return delay;
        }
        let spread = delay.as_secs_f64() * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-1.0..=1.0) * spread;
        Duration::try_from_secs_f64((delay.as_secs_f64() + offset).max(0.0)).unwrap_or(delay)
    }

    /// The actual sleep: the jittered delay, raised to any upstream
    /// `retry_after` hint, and never above `max_delay`.
    pub fn effective_delay(&self, attempt: u32, last_error: Option<&HuginnError>) -> Duration {
        let delay = self.calculate_delay(attempt, last_error);
        match last_error.and_then(HuginnError::retry_after) {
            Some(hint) => delay.max(hint).min(self.max_delay),
            None => delay,
        }
    }
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone, Default)]
pub struct RetryManager {
    policy: RetryPolicy,
}

impl RetryManager {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// See [`RetryPolicy::calculate_delay`].
    pub fn calculate_delay(&self, attempt: u32, last_error: Option<&HuginnError>) -> Duration {
        self.policy.calculate_delay(attempt, last_error)
    }

    /// Run `f` until it succeeds, fails permanently, or the attempt budget
    /// is spent. On exhaustion the last error is returned.
    pub async fn execute_with_retry<F, Fut, T>(&self, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_named("operation", f).await
    }

    /// Like [`execute_with_retry`](Self::execute_with_retry), labelling
    /// logs and metrics with `operation`.
    pub async fn execute_named<F, Fut, T>(&self, operation: &str, f: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_when(operation, f, HuginnError::is_transient).await
    }

    /// Like [`execute_named`](Self::execute_named), but an error is only
    /// retried when `should_retry` accepts it. The predicate is checked
    /// after every failure, so it may consult state the attempt changed.
    pub async fn execute_when<F, Fut, T, P>(
        &self,
        operation: &str,
        mut f: F,
        should_retry: P,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
        P: Fn(&HuginnError) -> bool,
    {
        let max_attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 0u32;
        loop {
            let err = match f().await {
                Ok(value) => return Ok(value),
                Err(e) if should_retry(&e) => e,
                Err(e) => return Err(e),
            };

            attempt += 1;
            if attempt >= max_attempts {
                error!(operation, attempts = attempt, error = %err, "retries exhausted");
                return Err(err);
            }

            let delay = self.policy.effective_delay(attempt - 1, Some(&err));
            metrics::counter!(telemetry::RETRIES_TOTAL, "operation" => operation.to_owned())
                .increment(1);
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient error"
            );
            tokio::time::sleep(delay).await;
        }
    }
}
