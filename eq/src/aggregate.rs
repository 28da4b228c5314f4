//! Cell state aggregation
//!
//! Pure functions over the module table. They are re-run in full after every
//! registry mutation; the table is small enough that nothing is cached
//! incrementally.

use crate::domain::{CellState, HardwareModule, ModuleState};

/// Most severe state among actor modules, Safe if there are none
pub fn recompute_safety(modules: &[HardwareModule]) -> ModuleState {
    modules
        .iter()
        .filter(|m| m.is_actor)
        .map(|m| m.current_state)
        .max()
        .unwrap_or(ModuleState::Safe)
}

/// Least progressed state among modules that are both actor and needed, Safe if there are none
pub fn recompute_operation(modules: &[HardwareModule]) -> ModuleState {
    modules
        .iter()
        .filter(|m| m.is_actor && m.is_needed)
        .map(|m| m.current_state)
        .min()
        .unwrap_or(ModuleState::Safe)
}

pub fn cell_state(modules: &[HardwareModule]) -> CellState {
    CellState {
        safety: recompute_safety(modules),
        operation: recompute_operation(modules),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ModuleType;

    fn module(id: u32, is_actor: bool, is_needed: bool, state: ModuleState) -> HardwareModule {
        let mut m = HardwareModule::new(id, ModuleType::Generic, is_actor, is_needed, None);
        m.current_state = state;
        m
    }

    #[test]
    fn test_empty_table_is_safe() {
        assert_eq!(cell_state(&[]), CellState::default());
        assert_eq!(cell_state(&[]).safety, ModuleState::Safe);
    }

    #[test]
    fn test_non_actors_do_not_count() {
        let modules = vec![module(1, false, true, ModuleState::Error)];
        assert_eq!(recompute_safety(&modules), ModuleState::Safe);
        assert_eq!(recompute_operation(&modules), ModuleState::Safe);
    }

    #[test]
    fn test_needed_actor_and_unneeded_actor_in_error() {
        let modules = vec![
            module(1, true, true, ModuleState::Normal),
            module(2, true, false, ModuleState::Error),
        ];
        let cell = cell_state(&modules);
        assert_eq!(cell.safety, ModuleState::Error);
        assert_eq!(cell.operation, ModuleState::Normal);
    }

    #[test]
    fn test_operation_is_least_progressed() {
        let modules = vec![
            module(1, true, true, ModuleState::Normal),
            module(2, true, true, ModuleState::Standby),
            module(3, true, true, ModuleState::Start),
        ];
        assert_eq!(recompute_operation(&modules), ModuleState::Standby);
        assert_eq!(recompute_safety(&modules), ModuleState::Normal);
    }
}
