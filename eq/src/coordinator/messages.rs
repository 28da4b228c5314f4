//! Message types for the Coordinator

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

use crate::domain::{Bootstrap, CellState, HardwareModule, ModuleId, ModuleState, ModuleSummary, ModuleType};
use crate::error::CoordResult;
use crate::router::ErrorOutcome;

/// Internal requests to the Coordinator task
#[derive(Debug)]
pub enum CoordRequest {
    /// Insert a module record; `module_id` forces the id
    Register {
        module_id: Option<ModuleId>,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
        reply: oneshot::Sender<CoordResult<HardwareModule>>,
    },

    /// Remove a module record
    Deregister {
        module_id: ModuleId,
        reply: oneshot::Sender<CoordResult<HardwareModule>>,
    },

    /// Remove a record whose process failed to start
    ///
    /// Only the registration made at `registered_at` is removed; replies
    /// whether it was still there.
    Rollback {
        module_id: ModuleId,
        registered_at: DateTime<Utc>,
        reason: String,
        reply: oneshot::Sender<bool>,
    },

    GetAllModules {
        reply: oneshot::Sender<Vec<ModuleSummary>>,
    },

    GetModule {
        module_id: ModuleId,
        reply: oneshot::Sender<Option<HardwareModule>>,
    },

    GetState {
        module_id: ModuleId,
        reply: oneshot::Sender<ModuleState>,
    },

    StateChanged {
        module_id: ModuleId,
        state: ModuleState,
        reply: oneshot::Sender<CoordResult<CellState>>,
    },

    ModuleError {
        module_id: ModuleId,
        error_code: i32,
        reply: oneshot::Sender<CoordResult<ErrorOutcome>>,
    },

    SetNeeded {
        module_id: ModuleId,
        needed: bool,
        reply: oneshot::Sender<CoordResult<CellState>>,
    },

    GetCellState {
        reply: oneshot::Sender<CellState>,
    },

    /// An outbound request to a module failed (internal)
    TransportFailed { module_id: ModuleId, reason: String },

    /// Get current metrics
    GetMetrics {
        reply: oneshot::Sender<CoordinatorMetrics>,
    },

    /// Shutdown the coordinator
    Shutdown,
}

/// Coordinator metrics for observability
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorMetrics {
    pub active_modules: usize,
    pub requests_handled: u64,
    pub registrations: u64,
    pub deregistrations: u64,
    pub rollbacks: u64,
    pub state_updates: u64,
    pub module_errors: u64,
    pub transport_failures: u64,
    pub rejected_requests: u64,
}
