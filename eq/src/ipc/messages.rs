//! IPC message types
//!
//! Simple JSON-over-newline protocol. Each message is a single line of JSON followed by `\n`.

use serde::{Deserialize, Serialize};

use crate::domain::{ModuleId, ModuleState, ModuleSummary, ModuleType};

/// Messages from modules (or operators) to the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CoordinatorMessage {
    /// Attach a module; blank package/executable means the module is already running
    RegisterModule {
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        #[serde(default)]
        package: String,
        #[serde(default)]
        executable: String,
    },

    DeregisterModule { module_id: ModuleId },

    GetAllModules,

    /// A module reports that it reached a new state
    StateUpdate { module_id: ModuleId, state: ModuleState },

    /// A module reports a fault
    ModuleError { module_id: ModuleId, error_code: i32 },

    SetNeeded { module_id: ModuleId, needed: bool },

    GetCellState,

    Ping,
}

/// Responses from the coordinator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum CoordinatorResponse {
    Ok,

    Registered { equiplet_id: u32, module_id: ModuleId },

    Modules { modules: Vec<ModuleSummary> },

    /// Where a faulted module should be driven next
    Recovery {
        module_id: ModuleId,
        recovery_state: ModuleState,
    },

    Cell {
        safety: ModuleState,
        operation: ModuleState,
    },

    Pong { version: String },

    /// `kind` names the failure (`ModuleNotFound`, `DuplicateModule`, ...)
    Error { kind: String, message: String },
}

impl CoordinatorResponse {
    pub fn succeeded(&self) -> bool {
        !matches!(self, CoordinatorResponse::Error { .. })
    }
}

/// Messages from the coordinator to a module's control endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ModuleMessage {
    RequestStateChange { desired_state: ModuleState },
}

/// Responses from a module's control endpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ModuleResponse {
    Ok,
    Error { message: String },
}
