//! Durable TTL cache.
//!
//! [`DiskCache`] keeps a moka-backed in-memory index in front of a
//! directory holding one JSON file per key. Every component that talks to
//! the network consults it first, because upstream calls are metered.
//!
//! # Availability over consistency
//!
//! The cache never surfaces an error to its caller:
//!
//! - an unreadable or corrupt file is logged and treated as a miss,
//! - a failed write is logged, the key's old file is dropped and the
//!   in-memory copy stays authoritative while it is indexed,
//! - if the directory cannot be created the cache runs memory-only.
//!
//! # Expiry
//!
//! Each entry carries its own TTL (the configured default unless overridden
//! at `set`). Reads do not extend it. Expired entries disappear from the
//! index lazily on read and their files are removed by
//! [`DiskCache::clear_expired`], which callers run periodically.
//!
//! The index is bounded by `max_entries`; the directory is not. A live
//! entry the index evicted is read back from its file on the next `get`.
//!
//! # Layout
//!
//! ```text
//! <directory>/
//!   download_meta_dQw4w9WgXcQ.json   {"key": "...", "timestamp": 1.7e9, "ttl": 3600.0, "data": {...}}
//!   info_dQw4w9WgXcQ.json
//! ```

mod entry;

pub use entry::CacheEntry;

use std::collections::HashSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use moka::future::Cache;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::telemetry;
use entry::{EntryExpiry, StoredEntry, file_stem};

/// Suffix of in-flight writes. Never read back, only swept by `clear_all`.
const TEMP_SUFFIX: &str = ".json.tmp";

/// Configuration for the durable cache.
///
/// ```rust
/// # use huginn::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new("/tmp/huginn-cache")
///     .ttl(Duration::from_secs(1800))
///     .max_entries(5_000);
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding one file per key.
    pub directory: PathBuf,
    /// Default time-to-live for entries. Default: 1 hour.
    pub ttl: Duration,
    /// Upper bound on in-memory entries. Default: 10,000.
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            directory: default_cache_dir(),
            ttl: Duration::from_secs(3600),
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    /// Create a config rooted at `directory` with default TTL and capacity.
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            ..Self::default()
        }
    }

    /// Set the default time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the maximum number of in-memory entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }
}

/// `<user cache dir>/huginn`, or `./huginn-cache` when the platform has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("huginn"))
        .unwrap_or_else(|| PathBuf::from("huginn-cache"))
}

/// Snapshot returned by [`DiskCache::stats`].
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Live entries in the index.
    pub entries: u64,
    /// Serialized size of keys and payloads, in bytes.
    pub estimated_bytes: u64,
    /// Directory the entries are persisted to. Reported even when the
    /// cache fell back to memory-only.
    pub directory: PathBuf,
    /// TTL applied by `set` when none is given.
    pub default_ttl: Duration,
    /// False when the directory could not be created and the cache is
    /// memory-only.
    pub durable: bool,
}

/// TTL cache with an in-memory index and one JSON file per key.
///
/// Cheap to share behind an `Arc`; all methods take `&self`.
pub struct DiskCache {
    entries: Cache<String, Arc<CacheEntry>>,
    config: CacheConfig,
    durable: bool,
}

impl DiskCache {
    /// Open the cache directory, creating it if needed, and load every live
    /// entry it holds. Expired and corrupt files found here are deleted.
    pub async fn open(config: CacheConfig) -> Self {
        let durable = match tokio::fs::create_dir_all(&config.directory).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    directory = %config.directory.display(),
                    error = %e,
                    "cache directory unavailable, running memory-only"
                );
                false
            }
        };

        let cache = Self {
            entries: build_index(&config),
            config,
            durable,
        };
        if cache.durable {
            cache.load_from_disk().await;
        }
        cache
    }

    /// A cache that never touches the filesystem.
    pub fn memory_only(config: CacheConfig) -> Self {
        Self {
            entries: build_index(&config),
            config,
            durable: false,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Look up a live value.
    ///
    /// Returns `None` for absent and expired keys. Emits hit/miss metrics.
    pub async fn get(&self, key: &str) -> Option<Value> {
        match self.entries.get(key).await {
            Some(entry) if entry.is_live() => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                Some(entry.value.clone())
            }
            Some(_) => {
                // The index clock and the wall clock can disagree by a tick;
                // the wall clock decides.
                self.entries.invalidate(key).await;
                self.remove_file(key).await;
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
            None => match self.load_file(key).await {
                Some(entry) => {
                    metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
                    Some(entry.value.clone())
                }
                None => {
                    metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                    None
                }
            },
        }
    }

    /// Read a key the index no longer holds (capacity eviction) from its
    /// file. A live entry goes back into the index; a dead file is removed.
    async fn load_file(&self, key: &str) -> Option<Arc<CacheEntry>> {
        if !self.durable {
            return None;
        }
        let path = self.path_for(key);
        match read_entry(&path, key).await {
            Some(entry) if entry.key != key => None,
            Some(entry) if entry.is_live() => {
                debug!(key, "cache entry reloaded from disk");
                let entry = Arc::new(entry);
                self.entries.insert(key.to_string(), entry.clone()).await;
                Some(entry)
            }
            _ => {
                remove_path(&path).await;
                None
            }
        }
    }

    /// Look up a live value and decode it. A value that no longer decodes
    /// as `T` (schema drift) is a miss.
    pub async fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.get(key).await?;
        match serde_json::from_value(value) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                debug!(key, error = %e, "cached value does not decode, treating as miss");
                None
            }
        }
    }

    /// Store `value` under `key` with the default TTL.
    pub async fn set(&self, key: &str, value: Value) {
        self.set_with_ttl(key, value, self.config.ttl).await;
    }

    /// Store `value` under `key` with an explicit TTL, overwriting any
    /// previous entry.
    pub async fn set_with_ttl(&self, key: &str, value: Value, ttl: Duration) {
        let entry = Arc::new(CacheEntry::new(key, value, ttl));
        self.entries.insert(key.to_string(), entry.clone()).await;
        if self.durable {
            self.persist(&entry).await;
        }
    }

    /// Serialize and store `value` with the default TTL. Values that fail
    /// to serialize are skipped with a warning.
    pub async fn set_serialized<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.set(key, v).await,
            Err(e) => warn!(key, error = %e, "value not serializable, not cached"),
        }
    }

    /// Remove a single key from memory and disk.
    pub async fn remove(&self, key: &str) {
        self.entries.invalidate(key).await;
        self.remove_file(key).await;
    }

    /// Remove every expired entry from the index and from disk.
    ///
    /// Returns the number of distinct keys purged. Corrupt files are
    /// deleted as well but not counted.
    pub async fn clear_expired(&self) -> usize {
        let now = SystemTime::now();
        let mut purged = HashSet::new();

        let stale: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live_at(now))
            .map(|(key, _)| key.as_ref().clone())
            .collect();
        for key in stale {
            self.entries.invalidate(&key).await;
            purged.insert(key);
        }
        self.entries.run_pending_tasks().await;

        if self.durable {
            for (path, stored) in self.scan_directory().await {
                match stored {
                    Some(entry) if entry.is_live_at(now) => {}
                    Some(entry) => {
                        // Drop the index copy too, in case the file is the
                        // only thing that knew it was stale.
                        self.entries.invalidate(&entry.key).await;
                        remove_path(&path).await;
                        purged.insert(entry.key);
                    }
                    None => remove_path(&path).await,
                }
            }
        }

        if !purged.is_empty() {
            debug!(count = purged.len(), "purged expired cache entries");
        }
        purged.len()
    }

    /// Remove every entry, in memory and on disk.
    pub async fn clear_all(&self) {
        self.entries.invalidate_all();
        self.entries.run_pending_tasks().await;

        if !self.durable {
            return;
        }
        let mut dir = match tokio::fs::read_dir(&self.config.directory).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(error = %e, "could not list cache directory for clear");
                return;
            }
        };
        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if is_cache_artifact(&path) {
                remove_path(&path).await;
            }
        }
    }

    /// Entry count, byte estimate, and configuration.
    pub async fn stats(&self) -> CacheStats {
        self.entries.run_pending_tasks().await;
        let now = SystemTime::now();
        let (entries, bytes) = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_live_at(now))
            .fold((0u64, 0u64), |(n, b), (_, entry)| {
                (n + 1, b + entry.estimated_size() as u64)
            });
        CacheStats {
            entries,
            estimated_bytes: bytes,
            directory: self.config.directory.clone(),
            default_ttl: self.config.ttl,
            durable: self.durable,
        }
    }

    // ========================================================================
    // Durable storage
    // ========================================================================

    fn path_for(&self, key: &str) -> PathBuf {
        self.config
            .directory
            .join(format!("{}.json", file_stem(key)))
    }

    async fn persist(&self, entry: &CacheEntry) {
        let path = self.path_for(&entry.key);
        let bytes = match serde_json::to_vec(&StoredEntry::from_entry(entry)) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %entry.key, error = %e, "could not encode cache entry");
                metrics::counter!(telemetry::CACHE_PERSIST_FAILURES_TOTAL).increment(1);
                return;
            }
        };

        // Each write gets its own temp file in the target directory, then
        // renames over the key's file. Concurrent writers of one key never
        // share a temp file, and readers never see a torn one.
        let directory = self.config.directory.clone();
        let target = path.clone();
        let result =
            tokio::task::spawn_blocking(move || write_atomically(&directory, &target, &bytes))
                .await
                .unwrap_or_else(|e| Err(std::io::Error::other(e)));

        if let Err(e) = result {
            warn!(key = %entry.key, path = %path.display(), error = %e, "cache write failed, keeping in-memory copy");
            metrics::counter!(telemetry::CACHE_PERSIST_FAILURES_TOTAL).increment(1);
            // An older file must not resurface once the index drops the entry.
            remove_path(&path).await;
        }
    }

    async fn remove_file(&self, key: &str) {
        if self.durable {
            remove_path(&self.path_for(key)).await;
        }
    }

    async fn load_from_disk(&self) {
        let now = SystemTime::now();
        let mut loaded = 0usize;
        for (path, stored) in self.scan_directory().await {
            match stored {
                Some(entry) if entry.is_live_at(now) => {
                    self.entries
                        .insert(entry.key.clone(), Arc::new(entry))
                        .await;
                    loaded += 1;
                }
                _ => remove_path(&path).await,
            }
        }
        debug!(loaded, directory = %self.config.directory.display(), "cache loaded from disk");
    }

    /// Read every `*.json` file in the directory. `None` marks a file that
    /// could not be read or decoded.
    async fn scan_directory(&self) -> Vec<(PathBuf, Option<CacheEntry>)> {
        let mut found = Vec::new();
        let mut dir = match tokio::fs::read_dir(&self.config.directory).await {
            Ok(dir) => dir,
            Err(e) => {
                warn!(directory = %self.config.directory.display(), error = %e, "could not list cache directory");
                return found;
            }
        };

        while let Ok(Some(item)) = dir.next_entry().await {
            let path = item.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            let entry = read_entry(&path, &stem).await;
            found.push((path, entry));
        }
        found
    }
}

fn build_index(config: &CacheConfig) -> Cache<String, Arc<CacheEntry>> {
    Cache::builder()
        .max_capacity(config.max_entries)
        .expire_after(EntryExpiry)
        .build()
}

fn write_atomically(directory: &Path, target: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = tempfile::Builder::new()
        .prefix(".")
        .suffix(TEMP_SUFFIX)
        .tempfile_in(directory)?;
    tmp.write_all(bytes)?;
    tmp.persist(target).map_err(|e| e.error)?;
    Ok(())
}

/// `fallback_key` names the entry when the file predates stored keys.
async fn read_entry(path: &Path, fallback_key: &str) -> Option<CacheEntry> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "unreadable cache file, treating as miss");
            return None;
        }
    };
    match serde_json::from_slice::<StoredEntry>(&bytes) {
        Ok(stored) => {
            let entry = stored.into_entry(fallback_key);
            if entry.is_none() {
                warn!(path = %path.display(), "cache file has invalid timestamps, treating as miss");
            }
            entry
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt cache file, treating as miss");
            None
        }
    }
}

fn is_cache_artifact(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".json") || name.ends_with(TEMP_SUFFIX)
}

async fn remove_path(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "could not delete cache file"),
    }
}
