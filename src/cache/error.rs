//! Error types for content cache operations

use thiserror::Error;

/// Errors that can occur while reading or writing cached content
#[derive(Error, Debug)]
pub enum CacheError {
    /// Backing store unreachable; callers treat this as a miss
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Compression error: {0}")]
    Compression(String),
}

/// Result type for cache operations
pub type CacheResult<T> = Result<T, CacheError>;

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, CacheError::Unavailable(_) | CacheError::Io(_))
    }
}

impl From<zip::result::ZipError> for CacheError {
    fn from(err: zip::result::ZipError) -> Self {
        CacheError::Compression(err.to_string())
    }
}
