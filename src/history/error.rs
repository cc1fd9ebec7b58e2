//! Error types for step history operations
//!
//! Every error is raised before the chain is mutated: a failed operation leaves the
//! preparation and its steps as they were.

use thiserror::Error;

use crate::models::ActionError;

/// Errors that can occur while reading or mutating a preparation's history
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HistoryError {
    #[error("Preparation '{0}' does not exist")]
    PreparationNotFound(String),

    #[error("Step '{0}' does not exist")]
    StepNotFound(String),

    #[error("Dataset '{0}' does not exist")]
    DatasetNotFound(String),

    /// A later action would use a column before the step creating it
    #[error(
        "Action #{action_index} ('{action}') references column '{column_id}' before its creation"
    )]
    InvalidOrdering {
        action_index: usize,
        action: String,
        column_id: String,
    },

    /// Action name absent from the catalog
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Dataset or metadata service unreachable
    #[error("Upstream service unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Backing store failure
    #[error("Repository error: {0}")]
    Repository(String),

    /// Action rejected while replaying a step chain
    #[error("Action error: {0}")]
    Action(#[from] ActionError),
}

/// Result type for history operations
pub type HistoryResult<T> = Result<T, HistoryError>;

impl HistoryError {
    pub fn repository(message: impl Into<String>) -> Self {
        Self::Repository(message.into())
    }

    /// Whether a caller may retry the same request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, HistoryError::UpstreamUnavailable(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            HistoryError::PreparationNotFound(_)
                | HistoryError::StepNotFound(_)
                | HistoryError::DatasetNotFound(_)
        )
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            HistoryError::InvalidOrdering {
                action_index,
                action,
                column_id,
            } => format!(
                "Cannot reorder: action #{action_index} ({action}) uses column {column_id} \
                 before the step that creates it."
            ),
            HistoryError::UpstreamUnavailable(service) => {
                format!("{service} is unavailable, try again later.")
            }
            _ => self.to_string(),
        }
    }
}
