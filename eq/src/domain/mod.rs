//! Domain types for the equiplet coordinator

mod module;
mod state;

pub use module::{Bootstrap, CellState, HardwareModule, ModuleId, ModuleSummary, ModuleType};
pub use state::ModuleState;
