//! Compressing cache decorator
//!
//! Wraps any [`ContentCache`] and stores entries as single-entry zip archives.
//! Reads recognise the zip local header and fall back to the raw bytes, so a
//! backend that already holds uncompressed entries keeps working.

use std::io::{Cursor, Read, Write};

use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::error::CacheResult;
use super::key::CacheKey;
use super::{CacheSink, ContentCache, TimeToLive};

const ENTRY_NAME: &str = "content";
const ZIP_MAGIC: &[u8; 4] = b"PK\x03\x04";

/// Zip-compressing [`ContentCache`] decorator
#[derive(Debug, Clone)]
pub struct ZipContentCache<C> {
    inner: C,
}

impl<C: ContentCache> ZipContentCache<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &C {
        &self.inner
    }
}

fn decompress(bytes: Vec<u8>) -> CacheResult<Vec<u8>> {
    if !bytes.starts_with(ZIP_MAGIC) {
        return Ok(bytes);
    }
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut entry = archive.by_index(0)?;
    let mut content = Vec::with_capacity(entry.size() as usize);
    entry.read_to_end(&mut content)?;
    Ok(content)
}

fn compress(bytes: &[u8]) -> CacheResult<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
    writer.start_file(ENTRY_NAME, options)?;
    writer.write_all(bytes)?;
    Ok(writer.finish()?.into_inner())
}

impl<C: ContentCache> ContentCache for ZipContentCache<C> {
    fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        self.inner.has(key)
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn Read + Send>>> {
        let Some(mut reader) = self.inner.get(key)? else {
            return Ok(None);
        };
        let mut raw = Vec::new();
        reader.read_to_end(&mut raw)?;
        Ok(Some(Box::new(Cursor::new(decompress(raw)?))))
    }

    fn put(&self, key: &CacheKey, ttl: TimeToLive) -> CacheResult<Box<dyn CacheSink>> {
        let inner = self.inner.put(key, ttl)?;
        Ok(Box::new(ZipSink {
            buffer: Vec::new(),
            inner,
        }))
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        self.inner.evict(key)
    }

    fn evict_prefix(&self, prefix: &str) -> CacheResult<usize> {
        self.inner.evict_prefix(prefix)
    }
}

struct ZipSink {
    buffer: Vec<u8>,
    inner: Box<dyn CacheSink>,
}

impl Write for ZipSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl CacheSink for ZipSink {
    fn commit(self: Box<Self>) -> CacheResult<()> {
        let ZipSink { buffer, mut inner } = *self;
        inner.write_all(&compress(&buffer)?)?;
        inner.commit()
    }
}
