//! Token-bucket rate limiter.
//!
//! Tokens refill lazily at `tokens_per_second`, capped at `bucket_size`.
//! [`RateLimiter::acquire`] suspends the calling task until enough tokens
//! are available. The internal lock is only held for arithmetic, never
//! across a sleep, so waiters never block each other's refills.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::telemetry;
use crate::{HuginnError, Result};

/// Configuration for a [`RateLimiter`].
///
/// ```rust
/// # use huginn::RateLimitConfig;
/// let config = RateLimitConfig::new().tokens_per_second(2.0).bucket_size(5);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    /// Refill rate. Must be positive. Default: 1.0.
    pub tokens_per_second: f64,
    /// Bucket capacity, i.e. maximum burst. Must be at least 1. Default: 10.
    pub bucket_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            tokens_per_second: 1.0,
            bucket_size: 10,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tokens_per_second(mut self, rate: f64) -> Self {
        self.tokens_per_second = rate;
        self
    }

    pub fn bucket_size(mut self, size: u32) -> Self {
        self.bucket_size = size;
        self
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter shared by every caller of one upstream.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    /// Build a limiter with a full bucket.
    ///
    /// Fails with `InvalidInput` if the rate is not a positive finite
    /// number or the bucket holds no tokens.
    pub fn new(config: RateLimitConfig) -> Result<Self> {
        if !(config.tokens_per_second.is_finite() && config.tokens_per_second > 0.0) {
            return Err(HuginnError::InvalidInput(format!(
                "tokens_per_second must be positive, got {}",
                config.tokens_per_second
            )));
        }
        if config.bucket_size == 0 {
            return Err(HuginnError::InvalidInput(
                "bucket_size must be at least 1".into(),
            ));
        }
        Ok(Self {
            config,
            state: Mutex::new(BucketState {
                tokens: f64::from(config.bucket_size),
                last_refill: Instant::now(),
            }),
        })
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Wait until `n` tokens are available, then take them.
    ///
    /// `acquire(0)` returns immediately. Asking for more tokens than the
    /// bucket can ever hold is rejected rather than waiting forever.
    pub async fn acquire(&self, n: u32) -> Result<()> {
        if n == 0 {
            return Ok(());
        }
        if n > self.config.bucket_size {
            return Err(HuginnError::InvalidInput(format!(
                "requested {n} tokens but bucket holds at most {}",
                self.config.bucket_size
            )));
        }

        let wanted = f64::from(n);
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.lock();
                self.refill(&mut state);
                if state.tokens >= wanted {
                    state.tokens -= wanted;
                    None
                } else {
                    let deficit = wanted - state.tokens;
                    Some(secs_to_duration(deficit / self.config.tokens_per_second))
                }
            };

            match wait {
                None => break,
                Some(delay) => {
                    debug!(tokens = n, wait_ms = delay.as_millis() as u64, "rate limited");
                    tokio::time::sleep(delay).await;
                }
            }
        }

        metrics::histogram!(telemetry::RATE_LIMIT_WAIT_SECONDS)
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    /// Tokens currently available, after refilling. Does not block and
    /// does not take anything.
    pub fn available_tokens(&self) -> f64 {
        let mut state = self.lock();
        self.refill(&mut state);
        state.tokens
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill);
        let capacity = f64::from(self.config.bucket_size);
        state.tokens =
            (state.tokens + elapsed.as_secs_f64() * self.config.tokens_per_second).min(capacity);
        state.last_refill = now;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Sleep length for a token deficit. Rounds up to the next millisecond so a
/// waiter never wakes a hair too early and spins.
fn secs_to_duration(secs: f64) -> Duration {
    let millis = (secs * 1000.0).ceil();
    if millis.is_finite() && millis > 0.0 {
        Duration::from_millis(millis as u64)
    } else {
        Duration::from_millis(1)
    }
}
