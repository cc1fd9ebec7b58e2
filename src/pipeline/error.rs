//! Error types for pipeline operations
//!
//! A failing action or analyzer aborts the whole run: rows are not retried one by one,
//! since a malformed action or a broken analyzer fails identically on every row.

use thiserror::Error;

use crate::analysis::AnalyzerError;
use crate::models::ActionError;

/// Errors that can occur while building or running a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Graph shape rejected at build time
    #[error("Invalid pipeline graph: {0}")]
    InvalidGraph(String),

    /// Operation not supported by this code path
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Action failed to compile or apply
    #[error("Action '{action}' failed")]
    Action {
        action: String,
        #[source]
        source: ActionError,
    },

    /// Injected analyzer failed during statistics or invalid detection
    #[error("Analyzer failed in {node} node")]
    AnalyzerFailure {
        node: String,
        #[source]
        source: AnalyzerError,
    },

    /// Row writer failure
    #[error("Writer error: {0}")]
    Writer(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Run cancelled by the caller
    #[error("Pipeline cancelled")]
    Cancelled,
}

/// Result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

impl PipelineError {
    pub fn invalid_graph(message: impl Into<String>) -> Self {
        Self::InvalidGraph(message.into())
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::UnsupportedOperation(message.into())
    }

    pub fn action(action: impl Into<String>, source: ActionError) -> Self {
        Self::Action {
            action: action.into(),
            source,
        }
    }

    pub fn analyzer(node: impl Into<String>, source: AnalyzerError) -> Self {
        Self::AnalyzerFailure {
            node: node.into(),
            source,
        }
    }

    /// Check if this error is recoverable (can retry)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Io(_))
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Action { action, source } => {
                format!("Action '{action}' failed: {source}\n\nHint: Check the action parameters.")
            }
            PipelineError::AnalyzerFailure { node, source } => {
                format!("Statistics computation failed in {node} node: {source}")
            }
            PipelineError::UnsupportedOperation(msg) => {
                format!("Unsupported operation: {msg}")
            }
            PipelineError::Cancelled => "Pipeline cancelled.".to_string(),
            _ => self.to_string(),
        }
    }
}
