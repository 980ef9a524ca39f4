//! Tests for the token-bucket rate limiter.
//!
//! All tests run on a paused clock, so waits are exact and instant.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::time::Instant;

use huginn::{HuginnError, RateLimitConfig, RateLimiter};

fn limiter(tokens_per_second: f64, bucket_size: u32) -> RateLimiter {
    RateLimiter::new(
        RateLimitConfig::new()
            .tokens_per_second(tokens_per_second)
            .bucket_size(bucket_size),
    )
    .unwrap()
}

#[tokio::test(start_paused = true)]
async fn second_acquire_waits_for_refill() {
    let limiter = limiter(1.0, 1);
    let start = Instant::now();

    limiter.acquire(1).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(10));

    limiter.acquire(1).await.unwrap();
    assert!(start.elapsed() >= Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn burst_up_to_bucket_is_immediate() {
    let limiter = limiter(1.0, 10);
    let start = Instant::now();
    for _ in 0..10 {
        limiter.acquire(1).await.unwrap();
    }
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn grants_never_exceed_bucket_plus_refill() {
    let limiter = limiter(2.0, 5);
    let start = Instant::now();

    let mut granted = 0u32;
    for _ in 0..15 {
        limiter.acquire(1).await.unwrap();
        granted += 1;
        let allowed = 5.0 + 2.0 * start.elapsed().as_secs_f64();
        assert!(f64::from(granted) <= allowed + 1e-9, "{granted} > {allowed}");
    }
    assert!(start.elapsed() >= Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn oversized_request_is_rejected() {
    let limiter = limiter(1.0, 3);
    let err = limiter.acquire(4).await.unwrap_err();
    assert!(matches!(err, HuginnError::InvalidInput(_)));
    // The failed request did not consume anything.
    assert_eq!(limiter.available_tokens(), 3.0);
}

#[tokio::test(start_paused = true)]
async fn zero_tokens_is_a_no_op() {
    let limiter = limiter(1.0, 1);
    limiter.acquire(1).await.unwrap();
    let start = Instant::now();
    limiter.acquire(0).await.unwrap();
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn available_tokens_refills_lazily_up_to_capacity() {
    let limiter = limiter(1.0, 10);
    limiter.acquire(3).await.unwrap();
    assert_eq!(limiter.available_tokens(), 7.0);

    tokio::time::advance(Duration::from_secs(2)).await;
    assert_eq!(limiter.available_tokens(), 9.0);

    tokio::time::advance(Duration::from_secs(60)).await;
    assert_eq!(limiter.available_tokens(), 10.0);
}

#[tokio::test(start_paused = true)]
async fn multi_token_acquire_waits_for_the_full_amount() {
    let limiter = limiter(2.0, 4);
    limiter.acquire(4).await.unwrap();

    let start = Instant::now();
    limiter.acquire(3).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test(start_paused = true)]
async fn concurrent_waiters_share_the_rate() {
    let limiter = Arc::new(limiter(1.0, 1));
    let start = Instant::now();

    let handles = (0..3).map(|_| {
        let limiter = limiter.clone();
        tokio::spawn(async move { limiter.acquire(1).await })
    });
    for outcome in join_all(handles).await {
        outcome.unwrap().unwrap();
    }

    // One token up front, two more at 1/s.
    assert!(start.elapsed() >= Duration::from_secs(2));
}

#[test]
fn invalid_configuration_is_rejected() {
    assert!(RateLimiter::new(RateLimitConfig::new().tokens_per_second(0.0)).is_err());
    assert!(RateLimiter::new(RateLimitConfig::new().bucket_size(0)).is_err());
}
