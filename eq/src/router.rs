//! Notification router - applies module notifications to the registry
//!
//! The router never talks to modules itself. `handle_module_error` only
//! computes where the module should go next; pushing that transition out is
//! left to the caller, outside the coordinator's serialization point.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::domain::{CellState, ModuleId, ModuleState};
use crate::error::CoordResult;
use crate::registry::Registry;

/// Default number of severity levels dropped when a module reports an error
pub const DEFAULT_ERROR_STATE_DROP: u8 = 3;

/// Answer to a `ModuleError` notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorOutcome {
    pub module_id: ModuleId,
    pub recovery_state: ModuleState,
}

#[derive(Debug, Clone)]
pub struct Router {
    error_state_drop: u8,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(DEFAULT_ERROR_STATE_DROP)
    }
}

impl Router {
    pub fn new(error_state_drop: u8) -> Self {
        Self { error_state_drop }
    }

    pub fn handle_state_changed(
        &self,
        registry: &mut Registry,
        module_id: ModuleId,
        new_state: ModuleState,
    ) -> CoordResult<CellState> {
        debug!(%module_id, %new_state, "Router::handle_state_changed: called");
        registry.update_state(module_id, new_state)
    }

    pub fn handle_module_error(
        &self,
        registry: &mut Registry,
        module_id: ModuleId,
        error_code: i32,
    ) -> CoordResult<ErrorOutcome> {
        debug!(%module_id, %error_code, "Router::handle_module_error: called");
        let current = registry.mark_error(module_id, error_code)?.current_state;
        let recovery_state = self.recovery_state(current);
        warn!(%module_id, %error_code, %current, %recovery_state, "Module reported an error");
        Ok(ErrorOutcome {
            module_id,
            recovery_state,
        })
    }

    /// Drop `error_state_drop` levels from `current`, never below Safe
    ///
    /// A module already in Error (or with no state) goes straight to Safe.
    pub fn recovery_state(&self, current: ModuleState) -> ModuleState {
        if current.is_sentinel() {
            return ModuleState::Safe;
        }
        let level = (current.level() - i32::from(self.error_state_drop)).max(ModuleState::Safe.level());
        ModuleState::from_level(level).unwrap_or(ModuleState::Safe)
    }
}
