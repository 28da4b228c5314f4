//! Module registry - the authoritative table of hardware modules in a cell
//!
//! Owned by the coordinator task; every mutation re-derives the cell state
//! before returning so readers never see a table and aggregate out of step.

use tracing::{debug, info};

use crate::aggregate;
use crate::domain::{Bootstrap, CellState, HardwareModule, ModuleId, ModuleState, ModuleSummary, ModuleType};
use crate::error::{CoordError, CoordResult};

/// First id handed out by a fresh registry
pub const FIRST_MODULE_ID: ModuleId = 1;

pub struct Registry {
    equiplet_id: u32,
    /// Insertion order is preserved for listings
    modules: Vec<HardwareModule>,
    /// `None` once an id of `ModuleId::MAX` has been handed out
    next_id: Option<ModuleId>,
    cell: CellState,
}

impl Registry {
    pub fn new(equiplet_id: u32) -> Self {
        debug!(%equiplet_id, "Registry::new: called");
        Self {
            equiplet_id,
            modules: Vec::new(),
            next_id: Some(FIRST_MODULE_ID),
            cell: CellState::default(),
        }
    }

    pub fn equiplet_id(&self) -> u32 {
        self.equiplet_id
    }

    /// Register a module under the next unused sequential id
    pub fn register(
        &mut self,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> CoordResult<HardwareModule> {
        let Some(id) = self.next_id else {
            return Err(CoordError::IdsExhausted);
        };
        self.register_with_id(id, module_type, is_actor, is_needed, bootstrap)
    }

    /// Register a module under a caller-chosen id
    pub fn register_with_id(
        &mut self,
        id: ModuleId,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> CoordResult<HardwareModule> {
        debug!(%id, %module_type, is_actor, is_needed, "Registry::register_with_id: called");
        if self.contains(id) {
            debug!(%id, "Registry::register_with_id: id taken");
            return Err(CoordError::DuplicateModule(id));
        }

        let module = HardwareModule::new(id, module_type, is_actor, is_needed, bootstrap);
        self.modules.push(module.clone());
        // Ids never go backwards, even after a forced id
        self.next_id = match (self.next_id, id.checked_add(1)) {
            (Some(next), Some(after)) => Some(next.max(after)),
            _ => None,
        };
        self.reaggregate();
        info!(module_id = id, %module_type, "Module registered");
        Ok(module)
    }

    pub fn deregister(&mut self, id: ModuleId) -> CoordResult<HardwareModule> {
        debug!(%id, "Registry::deregister: called");
        let index = self
            .modules
            .iter()
            .position(|m| m.id == id)
            .ok_or(CoordError::ModuleNotFound(id))?;
        let module = self.modules.remove(index);
        self.reaggregate();
        info!(module_id = id, "Module deregistered");
        Ok(module)
    }

    pub fn get(&self, id: ModuleId) -> Option<&HardwareModule> {
        self.modules.iter().find(|m| m.id == id)
    }

    /// Current state of a module, or `NoState` if it is unknown
    pub fn get_state(&self, id: ModuleId) -> ModuleState {
        self.get(id).map(|m| m.current_state).unwrap_or(ModuleState::NoState)
    }

    pub fn contains(&self, id: ModuleId) -> bool {
        self.modules.iter().any(|m| m.id == id)
    }

    /// Snapshot of every record in registration order
    pub fn list(&self) -> Vec<HardwareModule> {
        self.modules.clone()
    }

    pub fn summaries(&self) -> Vec<ModuleSummary> {
        self.modules.iter().map(HardwareModule::summary).collect()
    }

    /// Set a module's state; clears its error flag unless the new state is Error
    pub fn update_state(&mut self, id: ModuleId, state: ModuleState) -> CoordResult<CellState> {
        debug!(%id, %state, "Registry::update_state: called");
        let module = self.get_mut(id)?;
        module.current_state = state;
        if state != ModuleState::Error {
            module.error = false;
        }
        Ok(self.reaggregate())
    }

    pub fn set_needed(&mut self, id: ModuleId, needed: bool) -> CoordResult<CellState> {
        debug!(%id, needed, "Registry::set_needed: called");
        self.get_mut(id)?.is_needed = needed;
        Ok(self.reaggregate())
    }

    /// Flag a module as faulted; its state is left for the module to report
    pub fn mark_error(&mut self, id: ModuleId, code: i32) -> CoordResult<&HardwareModule> {
        debug!(%id, %code, "Registry::mark_error: called");
        let module = self.get_mut(id)?;
        module.error = true;
        module.last_error_code = Some(code);
        Ok(module)
    }

    pub fn cell_state(&self) -> CellState {
        self.cell
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    fn get_mut(&mut self, id: ModuleId) -> CoordResult<&mut HardwareModule> {
        self.modules
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(CoordError::ModuleNotFound(id))
    }

    fn reaggregate(&mut self) -> CellState {
        self.cell = aggregate::cell_state(&self.modules);
        debug!(cell = %self.cell, "Registry::reaggregate");
        self.cell
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn register(registry: &mut Registry, actor: bool, needed: bool) -> ModuleId {
        registry
            .register(ModuleType::Generic, actor, needed, None)
            .unwrap()
            .id
    }

    #[test]
    fn test_ids_are_sequential() {
        let mut registry = Registry::new(1);
        assert_eq!(register(&mut registry, true, true), 1);
        assert_eq!(register(&mut registry, true, true), 2);
        registry.deregister(2).unwrap();
        assert_eq!(register(&mut registry, true, true), 3);
    }

    #[test]
    fn test_forced_id_moves_counter_forward() {
        let mut registry = Registry::new(1);
        registry
            .register_with_id(10, ModuleType::Camera, false, false, None)
            .unwrap();
        assert_eq!(register(&mut registry, false, false), 11);

        // A forced id below the counter does not rewind it
        registry
            .register_with_id(5, ModuleType::Camera, false, false, None)
            .unwrap();
        assert_eq!(register(&mut registry, false, false), 12);
    }

    #[test]
    fn test_highest_forced_id_exhausts_sequential_ids() {
        let mut registry = Registry::new(1);
        registry
            .register_with_id(ModuleId::MAX, ModuleType::Camera, false, false, None)
            .unwrap();

        assert_eq!(
            registry.register(ModuleType::Generic, true, true, None).unwrap_err(),
            CoordError::IdsExhausted
        );
        assert_eq!(registry.len(), 1);

        // Forced ids still work and do not revive the counter
        registry
            .register_with_id(3, ModuleType::Gripper, true, true, None)
            .unwrap();
        assert!(registry.register(ModuleType::Generic, true, true, None).is_err());
        registry.deregister(ModuleId::MAX).unwrap();
        assert_eq!(
            registry.register(ModuleType::Generic, true, true, None).unwrap_err(),
            CoordError::IdsExhausted
        );
    }

    #[test]
    fn test_duplicate_leaves_registry_unchanged() {
        let mut registry = Registry::new(1);
        register(&mut registry, true, true);
        let before = registry.list();

        let err = registry
            .register_with_id(1, ModuleType::Gripper, false, false, None)
            .unwrap_err();
        assert_eq!(err, CoordError::DuplicateModule(1));
        assert_eq!(registry.list(), before);
    }

    #[test]
    fn test_deregister_unknown() {
        let mut registry = Registry::new(1);
        register(&mut registry, true, true);
        let before = registry.list();
        assert_eq!(registry.deregister(42).unwrap_err(), CoordError::ModuleNotFound(42));
        assert_eq!(registry.list(), before);
    }

    #[test]
    fn test_get_state_of_unknown_is_no_state() {
        let registry = Registry::new(1);
        assert_eq!(registry.get_state(7), ModuleState::NoState);
    }

    #[test]
    fn test_mutations_reaggregate() {
        let mut registry = Registry::new(1);
        let a = register(&mut registry, true, true);
        let b = register(&mut registry, true, false);

        registry.update_state(a, ModuleState::Normal).unwrap();
        let cell = registry.update_state(b, ModuleState::Error).unwrap();
        assert_eq!(cell.safety, ModuleState::Error);
        assert_eq!(cell.operation, ModuleState::Normal);

        let cell = registry.set_needed(b, true).unwrap();
        assert_eq!(cell.operation, ModuleState::Normal);
        assert_eq!(registry.cell_state(), cell);

        registry.deregister(b).unwrap();
        assert_eq!(registry.cell_state().safety, ModuleState::Normal);
    }

    #[test]
    fn test_error_flag_cleared_by_state_update() {
        let mut registry = Registry::new(1);
        let id = register(&mut registry, true, true);
        registry.mark_error(id, 12).unwrap();
        assert!(registry.get(id).unwrap().error);

        registry.update_state(id, ModuleState::Error).unwrap();
        assert!(registry.get(id).unwrap().error);

        registry.update_state(id, ModuleState::Safe).unwrap();
        let module = registry.get(id).unwrap();
        assert!(!module.error);
        assert_eq!(module.last_error_code, Some(12));
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let mut registry = Registry::new(1);
        registry
            .register_with_id(9, ModuleType::Sensor, false, false, None)
            .unwrap();
        register(&mut registry, false, false);
        registry
            .register_with_id(3, ModuleType::Sensor, false, false, None)
            .unwrap();
        let ids: Vec<ModuleId> = registry.list().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![9, 10, 3]);
    }
}
