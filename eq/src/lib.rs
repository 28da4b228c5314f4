//! Equiplet - coordinator of a reconfigurable manufacturing work-cell
//!
//! An equiplet is a cell built from independently running hardware-module
//! processes. The coordinator keeps the authoritative module registry,
//! aggregates module states into two cell-wide signals and routes state
//! changes and errors between modules.
//!
//! # Core Concepts
//!
//! - **Single writer**: one coordinator task owns the registry; everything else talks to it through a [`CoordinatorHandle`]
//! - **Safety**: the most severe state of any actor module
//! - **Operation**: the least capable state among actor modules the cell needs
//! - **Recovery**: a faulting module is sent back a fixed number of severity levels
//!
//! # Modules
//!
//! - [`domain`] - Module states, module records and the cell state
//! - [`registry`] / [`aggregate`] / [`router`] - Registry and its pure logic
//! - [`coordinator`] - Actor owning the registry
//! - [`supervisor`] - Launching and stopping module processes
//! - [`transport`] - Outbound state change requests to modules
//! - [`ipc`] - Socket protocol modules use to reach the coordinator
//! - [`instructions`] - Blackboard instruction feed bridge
//! - [`config`] / [`cli`] - Configuration and command line

pub mod aggregate;
pub mod cli;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod events;
pub mod instructions;
pub mod ipc;
pub mod registry;
pub mod router;
pub mod supervisor;
pub mod transport;

// Re-export commonly used types
pub use config::Config;
pub use coordinator::{Coordinator, CoordinatorConfig, CoordinatorHandle, CoordinatorMetrics, Registration};
pub use domain::{Bootstrap, CellState, HardwareModule, ModuleId, ModuleState, ModuleSummary, ModuleType};
pub use error::{CoordError, CoordResult, TransportError};
pub use events::CellEvent;
pub use instructions::InstructionBridge;
pub use registry::Registry;
pub use router::{ErrorOutcome, Router};
pub use supervisor::{ProcessSupervisor, ShellSupervisor};
pub use transport::{ModuleTransport, SocketTransport};
