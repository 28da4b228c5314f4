//! Coordinator error types

use std::time::Duration;
use thiserror::Error;

use crate::domain::ModuleId;

/// Failures returned by coordinator operations
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoordError {
    #[error("Module {0} is already registered")]
    DuplicateModule(ModuleId),

    #[error("Module {0} is not registered")]
    ModuleNotFound(ModuleId),

    #[error("Bootstrap of module {module_id} failed: {reason}")]
    BootstrapFailure { module_id: ModuleId, reason: String },

    #[error("Request to module {module_id} failed: {reason}")]
    TransportFailure { module_id: ModuleId, reason: String },

    #[error("No module ids left to assign")]
    IdsExhausted,

    #[error("Coordinator channel closed")]
    ChannelError,
}

impl CoordError {
    /// Short name of the failure kind, as sent over IPC
    pub fn kind(&self) -> &'static str {
        match self {
            CoordError::DuplicateModule(_) => "DuplicateModule",
            CoordError::ModuleNotFound(_) => "ModuleNotFound",
            CoordError::BootstrapFailure { .. } => "BootstrapFailure",
            CoordError::TransportFailure { .. } => "TransportFailure",
            CoordError::IdsExhausted => "IdsExhausted",
            CoordError::ChannelError => "ChannelError",
        }
    }
}

/// Result type of coordinator operations
pub type CoordResult<T> = Result<T, CoordError>;

/// Failures of an outbound call to a module endpoint
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {endpoint}: {source}")]
    Connect {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Module rejected request: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl TransportError {
    pub fn into_coord(self, module_id: ModuleId) -> CoordError {
        CoordError::TransportFailure {
            module_id,
            reason: self.to_string(),
        }
    }
}
