//! Content cache
//!
//! Byte-oriented store for computed transformation output and metadata, keyed by
//! [`CacheKey`]. Content is published only by [`CacheSink::commit`]: a sink dropped
//! before commit (error, panic, cancelled run) leaves nothing behind, so `has` never
//! reports a truncated entry.
//!
//! The cache is an optimization. Callers go through [`read_or_miss`] and
//! [`write_or_skip`], which log backend failures and carry on as if the entry were
//! absent.

pub mod compressed;
pub mod error;
pub mod file;
pub mod key;
pub mod memory;

use std::io::{Read, Write};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub use compressed::ZipContentCache;
pub use error::{CacheError, CacheResult};
pub use file::FileContentCache;
pub use key::{CacheKey, CacheKind, filter_hash};
pub use memory::InMemoryContentCache;

/// Default time to live of cache entries (one hour)
pub const DEFAULT_TTL_SECS: u64 = 3600;

/// Longest accepted time to live (ten years)
const MAX_TTL_SECS: u64 = 10 * 365 * 24 * 3600;

/// How long an entry stays readable
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeToLive {
    /// The backend's configured default
    #[default]
    Default,
    /// Never expires
    Permanent,
    Seconds(u64),
}

impl TimeToLive {
    /// Expiry instant of an entry written at `now`; `None` for permanent entries
    pub fn expiry(&self, now: DateTime<Utc>, default_secs: u64) -> Option<DateTime<Utc>> {
        let secs = match self {
            TimeToLive::Default => default_secs,
            TimeToLive::Permanent => return None,
            TimeToLive::Seconds(secs) => *secs,
        };
        Some(now + Duration::seconds(secs.min(MAX_TTL_SECS) as i64))
    }
}

/// Pending cache entry; bytes become visible on [`CacheSink::commit`]
pub trait CacheSink: Write + Send {
    fn commit(self: Box<Self>) -> CacheResult<()>;
}

/// Backing store contract
pub trait ContentCache: Send + Sync {
    /// Whether a committed, unexpired entry exists
    fn has(&self, key: &CacheKey) -> CacheResult<bool>;

    /// Reader over a committed, unexpired entry
    fn get(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn Read + Send>>>;

    /// Start writing an entry
    fn put(&self, key: &CacheKey, ttl: TimeToLive) -> CacheResult<Box<dyn CacheSink>>;

    fn evict(&self, key: &CacheKey) -> CacheResult<()>;

    /// Remove every entry whose rendered key starts with `prefix`; returns how many
    fn evict_prefix(&self, prefix: &str) -> CacheResult<usize>;
}

impl<C: ContentCache + ?Sized> ContentCache for Arc<C> {
    fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        (**self).has(key)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn Read + Send>>> {
        (**self).get(key)
    }

    fn put(&self, key: &CacheKey, ttl: TimeToLive) -> CacheResult<Box<dyn CacheSink>> {
        (**self).put(key, ttl)
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        (**self).evict(key)
    }

    fn evict_prefix(&self, prefix: &str) -> CacheResult<usize> {
        (**self).evict_prefix(prefix)
    }
}

/// Read a whole entry, treating any failure as a miss
pub fn read_or_miss(cache: &dyn ContentCache, key: &CacheKey) -> Option<Vec<u8>> {
    let result = cache.get(key).and_then(|reader| {
        reader
            .map(|mut r| {
                let mut bytes = Vec::new();
                r.read_to_end(&mut bytes).map(|_| bytes)
            })
            .transpose()
            .map_err(CacheError::from)
    });
    match result {
        Ok(Some(bytes)) => {
            debug!(key = %key, bytes = bytes.len(), "Cache hit");
            Some(bytes)
        }
        Ok(None) => {
            debug!(key = %key, "Cache miss");
            None
        }
        Err(e) => {
            warn!(key = %key, error = %e, "Cache read failed, treating as miss");
            None
        }
    }
}

/// Write and commit a whole entry; failures are logged and swallowed
pub fn write_or_skip(cache: &dyn ContentCache, key: &CacheKey, ttl: TimeToLive, bytes: &[u8]) -> bool {
    let result = cache.put(key, ttl).and_then(|mut sink| {
        sink.write_all(bytes)?;
        sink.commit()
    });
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(key = %key, error = %e, "Cache write failed, content not cached");
            false
        }
    }
}

/// Evict by prefix; failures are logged and swallowed
pub fn evict_or_warn(cache: &dyn ContentCache, prefix: &str) -> usize {
    match cache.evict_prefix(prefix) {
        Ok(count) => {
            debug!(prefix, count, "Evicted cache entries");
            count
        }
        Err(e) => {
            warn!(prefix, error = %e, "Cache eviction failed");
            0
        }
    }
}
