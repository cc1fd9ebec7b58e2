//! In-memory content cache
//!
//! Keys are kept in a `BTreeMap`, so prefix eviction is a range scan over the
//! matching keys only.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use super::error::{CacheError, CacheResult};
use super::key::CacheKey;
use super::{CacheSink, ContentCache, DEFAULT_TTL_SECS, TimeToLive};

#[derive(Debug)]
struct Entry {
    bytes: Arc<Vec<u8>>,
    expires: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_none_or(|at| at > now)
    }
}

type Entries = Arc<RwLock<BTreeMap<String, Entry>>>;

/// Process-local [`ContentCache`]
#[derive(Debug, Clone)]
pub struct InMemoryContentCache {
    entries: Entries,
    default_ttl_secs: u64,
}

impl Default for InMemoryContentCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL_SECS)
    }
}

impl InMemoryContentCache {
    pub fn new(default_ttl_secs: u64) -> Self {
        Self {
            entries: Arc::new(RwLock::new(BTreeMap::new())),
            default_ttl_secs,
        }
    }

    /// Committed keys, expired ones included, in key order
    pub fn keys(&self) -> Vec<String> {
        self.entries
            .read()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries; returns how many were removed
    pub fn purge_expired(&self) -> CacheResult<usize> {
        let now = Utc::now();
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live(now));
        Ok(before - entries.len())
    }
}

fn poisoned() -> CacheError {
    CacheError::unavailable("in-memory cache lock poisoned")
}

impl ContentCache for InMemoryContentCache {
    fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        Ok(entries
            .get(&key.key())
            .is_some_and(|entry| entry.is_live(Utc::now())))
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn Read + Send>>> {
        let entries = self.entries.read().map_err(|_| poisoned())?;
        let reader = entries
            .get(&key.key())
            .filter(|entry| entry.is_live(Utc::now()))
            .map(|entry| {
                let bytes = Arc::clone(&entry.bytes);
                Box::new(Cursor::new(SharedBytes(bytes))) as Box<dyn Read + Send>
            });
        Ok(reader)
    }

    fn put(&self, key: &CacheKey, ttl: TimeToLive) -> CacheResult<Box<dyn CacheSink>> {
        Ok(Box::new(MemorySink {
            key: key.key(),
            expires: ttl.expiry(Utc::now(), self.default_ttl_secs),
            buffer: Vec::new(),
            entries: Arc::clone(&self.entries),
        }))
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        entries.remove(&key.key());
        Ok(())
    }

    fn evict_prefix(&self, prefix: &str) -> CacheResult<usize> {
        let mut entries = self.entries.write().map_err(|_| poisoned())?;
        let matching: Vec<String> = entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &matching {
            entries.remove(key);
        }
        Ok(matching.len())
    }
}

struct SharedBytes(Arc<Vec<u8>>);

impl AsRef<[u8]> for SharedBytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

struct MemorySink {
    key: String,
    expires: Option<DateTime<Utc>>,
    buffer: Vec<u8>,
    entries: Entries,
}

impl Write for MemorySink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CacheSink for MemorySink {
    fn commit(self: Box<Self>) -> CacheResult<()> {
        let MemorySink {
            key,
            expires,
            buffer,
            entries,
        } = *self;
        let mut entries = entries.write().map_err(|_| poisoned())?;
        entries.insert(
            key,
            Entry {
                bytes: Arc::new(buffer),
                expires,
            },
        );
        Ok(())
    }
}
