//! File system content cache
//!
//! Each key segment becomes a directory level under the cache root, so prefix
//! eviction of a whole preparation or dataset is a directory removal. Entries are
//! written to `.tmp/` first and renamed into place on commit. Expiry is stored in a
//! `.ttl` sidecar next to the content file; permanent entries have none.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use super::error::{CacheError, CacheResult};
use super::key::CacheKey;
use super::{CacheSink, ContentCache, DEFAULT_TTL_SECS, TimeToLive};

const TMP_DIR: &str = ".tmp";
const TTL_SUFFIX: &str = ".ttl";

/// [`ContentCache`] over a local directory
#[derive(Debug, Clone)]
pub struct FileContentCache {
    root: PathBuf,
    default_ttl_secs: u64,
}

impl FileContentCache {
    /// Open (creating if needed) a cache rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self {
            root,
            default_ttl_secs: DEFAULT_TTL_SECS,
        })
    }

    pub fn with_default_ttl(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, rendered: &str) -> PathBuf {
        rendered
            .split('/')
            .filter(|s| !s.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(safe_segment(segment)))
    }

    /// Content path of a live entry, removing it if it has expired
    fn live_path(&self, key: &CacheKey) -> CacheResult<Option<PathBuf>> {
        let path = self.path_of(&key.key());
        if !path.is_file() {
            return Ok(None);
        }
        if let Some(expires) = read_expiry(&ttl_path(&path))? {
            if expires <= Utc::now() {
                debug!(key = %key, "Removing expired cache entry");
                remove_entry(&path)?;
                return Ok(None);
            }
        }
        Ok(Some(path))
    }
}

/// Key segments are already percent-encoded, so a leading `%2E` cannot clash
fn safe_segment(segment: &str) -> String {
    match segment {
        "." | ".." => segment.replace('.', "%2E"),
        s if s == TMP_DIR => format!("%2E{}", &s[1..]),
        s => s.to_string(),
    }
}

fn ttl_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(TTL_SUFFIX);
    PathBuf::from(name)
}

fn read_expiry(path: &Path) -> CacheResult<Option<DateTime<Utc>>> {
    if !path.is_file() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)?;
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|at| Some(at.with_timezone(&Utc)))
        .map_err(|e| CacheError::unavailable(format!("corrupt expiry in {}: {}", path.display(), e)))
}

fn remove_entry(path: &Path) -> CacheResult<()> {
    for target in [path.to_path_buf(), ttl_path(path)] {
        match fs::remove_file(&target) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Content files (sidecars excluded) below `dir`, depth first
fn content_files(dir: &Path, out: &mut Vec<PathBuf>) -> CacheResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            content_files(&path, out)?;
        } else if !path.to_string_lossy().ends_with(TTL_SUFFIX) {
            out.push(path);
        }
    }
    Ok(())
}

impl ContentCache for FileContentCache {
    fn has(&self, key: &CacheKey) -> CacheResult<bool> {
        Ok(self.live_path(key)?.is_some())
    }

    fn get(&self, key: &CacheKey) -> CacheResult<Option<Box<dyn Read + Send>>> {
        match self.live_path(key)? {
            Some(path) => {
                let file = File::open(path)?;
                Ok(Some(Box::new(BufReader::new(file))))
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &CacheKey, ttl: TimeToLive) -> CacheResult<Box<dyn CacheSink>> {
        let tmp = self.root.join(TMP_DIR).join(Uuid::new_v4().to_string());
        let file = File::create(&tmp)?;
        Ok(Box::new(FileSink {
            target: self.path_of(&key.key()),
            expires: ttl.expiry(Utc::now(), self.default_ttl_secs),
            writer: Some(BufWriter::new(file)),
            tmp,
        }))
    }

    fn evict(&self, key: &CacheKey) -> CacheResult<()> {
        remove_entry(&self.path_of(&key.key()))
    }

    fn evict_prefix(&self, prefix: &str) -> CacheResult<usize> {
        // Walk from the deepest directory the prefix fully names
        let base = match prefix.rfind('/') {
            Some(pos) => self.path_of(&prefix[..pos]),
            None => self.root.clone(),
        };
        let mut files = Vec::new();
        content_files(&base, &mut files)?;

        let tmp_root = self.root.join(TMP_DIR);
        let mut removed = 0;
        for path in files {
            if path.starts_with(&tmp_root) {
                continue;
            }
            let Ok(relative) = path.strip_prefix(&self.root) else {
                continue;
            };
            let rendered = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if rendered.starts_with(prefix) {
                remove_entry(&path)?;
                removed += 1;
            }
        }

        if prefix.ends_with('/') && base != self.root {
            if let Err(e) = fs::remove_dir_all(&base) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %base.display(), error = %e, "Could not remove cache directory");
                }
            }
        }
        Ok(removed)
    }
}

struct FileSink {
    target: PathBuf,
    expires: Option<DateTime<Utc>>,
    writer: Option<BufWriter<File>>,
    tmp: PathBuf,
}

impl Write for FileSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(writer) => writer.write(buf),
            None => Err(std::io::Error::other("cache sink already committed")),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl CacheSink for FileSink {
    fn commit(mut self: Box<Self>) -> CacheResult<()> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| CacheError::Io(e.into_error()))?;
            file.sync_all()?;
        }
        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent)?;
        }
        let sidecar = ttl_path(&self.target);
        match self.expires {
            Some(at) => fs::write(&sidecar, at.to_rfc3339())?,
            None => {
                if sidecar.exists() {
                    fs::remove_file(&sidecar)?;
                }
            }
        }
        fs::rename(&self.tmp, &self.target)?;
        Ok(())
    }
}

impl Drop for FileSink {
    fn drop(&mut self) {
        // No-op after a successful commit: the temp file has been renamed
        self.writer.take();
        if self.tmp.exists() {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
