//! Error types for analyzers

use thiserror::Error;

/// Errors raised by an analyzer capability
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnalyzerError {
    /// A record did not have one value per analyzed column
    #[error("Expected {expected} values per record, got {actual}")]
    ArityMismatch { expected: usize, actual: usize },

    /// The analyzer could not be built for the requested columns
    #[error("Cannot build analyzer: {0}")]
    Build(String),

    /// Analysis failed
    #[error("Analysis failed: {0}")]
    Failed(String),
}

/// Result type for analyzer operations
pub type AnalyzerResult<T> = Result<T, AnalyzerError>;
