//! Blackboard error types

use thiserror::Error;

/// Errors from feed storage operations
#[derive(Debug, Error)]
pub enum BlackboardError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to lock feed: {0}")]
    Lock(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },
}

/// A subscription filter could not be evaluated against an entry
///
/// Faults are local to one (subscription, entry) pair. The matcher logs them
/// and moves on.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Match fault on field '{field}': {reason}")]
pub struct MatchFault {
    pub field: String,
    pub reason: String,
}

impl MatchFault {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
