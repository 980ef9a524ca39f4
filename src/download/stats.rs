//! Aggregate download statistics.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::types::duration_secs_f64;

#[derive(Debug, Default)]
struct Counters {
    attempts: u64,
    successes: u64,
    failures: u64,
    total_bytes: u64,
    total_time: Duration,
    last_success_at: Option<DateTime<Utc>>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Counters shared by every orchestrator that holds the same `Arc`.
///
/// Monotonic between explicit [`reset`](Self::reset) calls.
#[derive(Debug, Default)]
pub struct DownloaderStats {
    inner: Mutex<Counters>,
}

/// Point-in-time copy of [`DownloaderStats`], with derived averages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub attempts: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_bytes: u64,
    #[serde(with = "duration_secs_f64")]
    pub total_time: Duration,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    /// `successes / attempts`, 0.0 before any attempt.
    pub success_rate: f64,
    #[serde(with = "duration_secs_f64")]
    pub avg_download_time: Duration,
    pub avg_artifact_size: u64,
}

impl DownloaderStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_attempt(&self) {
        self.lock().attempts += 1;
    }

    pub(crate) fn record_success(&self, bytes: Option<u64>, elapsed: Duration) {
        let mut c = self.lock();
        c.successes += 1;
        c.total_bytes += bytes.unwrap_or(0);
        c.total_time += elapsed;
        c.last_success_at = Some(Utc::now());
    }

    pub(crate) fn record_failure(&self) {
        let mut c = self.lock();
        c.failures += 1;
        c.last_failure_at = Some(Utc::now());
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = self.lock();
        let success_rate = if c.attempts > 0 {
            c.successes as f64 / c.attempts as f64
        } else {
            0.0
        };
        let (avg_download_time, avg_artifact_size) = match u32::try_from(c.successes) {
            Ok(0) => (Duration::ZERO, 0),
            Ok(n) => (c.total_time / n, c.total_bytes / u64::from(n)),
            Err(_) => (
                Duration::from_secs_f64(c.total_time.as_secs_f64() / c.successes as f64),
                c.total_bytes / c.successes,
            ),
        };
        StatsSnapshot {
            attempts: c.attempts,
            successes: c.successes,
            failures: c.failures,
            total_bytes: c.total_bytes,
            total_time: c.total_time,
            last_success_at: c.last_success_at,
            last_failure_at: c.last_failure_at,
            success_rate,
            avg_download_time,
            avg_artifact_size,
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        *self.lock() = Counters::default();
    }

    fn lock(&self) -> MutexGuard<'_, Counters> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
