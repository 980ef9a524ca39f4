//! Cache entry representation, on-disk format, and expiry policy.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use moka::Expiry;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Longest file stem written to the cache directory.
const MAX_STEM_LEN: usize = 120;

/// A cached value with its own time-to-live.
///
/// Live iff `now - created_at <= ttl`. Reads never move `created_at`.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: Value,
    pub created_at: SystemTime,
    pub ttl: Duration,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, value: Value, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value,
            created_at: SystemTime::now(),
            ttl,
        }
    }

    /// Age of the entry at `now`. Clock steps backwards count as zero age.
    pub fn age_at(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or(Duration::ZERO)
    }

    pub fn is_live_at(&self, now: SystemTime) -> bool {
        self.age_at(now) <= self.ttl
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(SystemTime::now())
    }

    /// Time left before the entry expires, zero if already expired.
    pub fn remaining_at(&self, now: SystemTime) -> Duration {
        self.ttl.saturating_sub(self.age_at(now))
    }

    /// Rough in-memory footprint: key plus serialized payload.
    pub(crate) fn estimated_size(&self) -> usize {
        self.key.len() + serde_json::to_vec(&self.value).map_or(0, |v| v.len())
    }
}

/// JSON shape of a cache file: `{key, timestamp, ttl, data}`.
///
/// `timestamp` is unix seconds and `ttl` is seconds, both as floats.
/// `key` is optional so files written without it still load (the file stem
/// is used instead).
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct StoredEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub timestamp: f64,
    pub ttl: f64,
    pub data: Value,
}

impl StoredEntry {
    pub fn from_entry(entry: &CacheEntry) -> Self {
        let timestamp = entry
            .created_at
            .duration_since(UNIX_EPOCH)
            .map_or(0.0, |d| d.as_secs_f64());
        Self {
            key: Some(entry.key.clone()),
            timestamp,
            ttl: entry.ttl.as_secs_f64(),
            data: entry.value.clone(),
        }
    }

    /// Convert back to an entry. `None` if the timestamps are nonsensical
    /// (negative, NaN, infinite), which is treated like a corrupt file.
    pub fn into_entry(self, fallback_key: &str) -> Option<CacheEntry> {
        let created = Duration::try_from_secs_f64(self.timestamp).ok()?;
        let ttl = Duration::try_from_secs_f64(self.ttl).ok()?;
        Some(CacheEntry {
            key: self.key.unwrap_or_else(|| fallback_key.to_string()),
            value: self.data,
            created_at: UNIX_EPOCH + created,
            ttl,
        })
    }
}

/// File stem for a cache key.
///
/// Keys made of `[A-Za-z0-9_.-]` map to themselves. Anything else has the
/// offending characters replaced and a hash of the full key appended, so
/// distinct keys keep distinct files.
pub(crate) fn file_stem(key: &str) -> String {
    let safe = !key.is_empty()
        && !key.starts_with('.')
        && key.len() <= MAX_STEM_LEN
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if safe {
        return key.to_string();
    }

    let mut stem: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .take(MAX_STEM_LEN - 17)
        .collect();
    stem.push('-');
    stem.push_str(&format!("{:016x}", fnv1a64(key.as_bytes())));
    stem
}

/// FNV-1a: stable across processes and toolchains, unlike `DefaultHasher`,
/// which matters because file names must survive restarts.
fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Per-entry expiry for the moka index: each entry lives for whatever is
/// left of its own TTL.
pub(crate) struct EntryExpiry;

impl Expiry<String, Arc<CacheEntry>> for EntryExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.remaining_at(SystemTime::now()))
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Arc<CacheEntry>,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.remaining_at(SystemTime::now()))
    }
}
