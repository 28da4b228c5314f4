//! Instruction bridge - feeds blackboard instructions into the coordinator
//!
//! Instructions are documents inserted into the `instruction` collection:
//!
//! ```json
//! {"message": {"destination": "equiplet_1", "command": "StateUpdate",
//!              "payload": {"module_id": 2, "state": "normal"}}}
//! ```
//!
//! Every delivered instruction is acknowledged (its document is removed from
//! the collection by `_id`) whether or not it could be applied. Instructions
//! addressed to other equiplets are left alone.

use blackboard::{Blackboard, FeedEntry, Filter, Matcher, Operation};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::coordinator::CoordinatorHandle;
use crate::domain::{Bootstrap, ModuleId, ModuleState, ModuleType};
use crate::error::CoordError;

/// Collection instructions are read from unless configured otherwise
pub const DEFAULT_INSTRUCTION_COLLECTION: &str = "instruction";

/// Destination addressing every equiplet
pub const BROADCAST_DESTINATION: &str = "*";

#[derive(Debug, Error)]
pub enum InstructionError {
    #[error("Malformed instruction: {0}")]
    Malformed(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error(transparent)]
    Coordinator(#[from] CoordError),
}

#[derive(Debug, Deserialize)]
struct InstructionEnvelope {
    message: InstructionMessage,
}

#[derive(Debug, Deserialize)]
struct InstructionMessage {
    #[serde(default)]
    destination: String,
    command: String,
    #[serde(default)]
    payload: Value,
}

#[derive(Debug, Deserialize)]
struct RegisterPayload {
    module_type: ModuleType,
    #[serde(default)]
    is_actor: bool,
    #[serde(default)]
    is_needed: bool,
    #[serde(default)]
    package: String,
    #[serde(default)]
    executable: String,
}

#[derive(Debug, Deserialize)]
struct ModulePayload {
    module_id: ModuleId,
}

#[derive(Debug, Deserialize)]
struct StatePayload {
    module_id: ModuleId,
    state: ModuleState,
}

#[derive(Debug, Deserialize)]
struct ErrorPayload {
    module_id: ModuleId,
    error_code: i32,
}

#[derive(Debug, Deserialize)]
struct NeededPayload {
    module_id: ModuleId,
    needed: bool,
}

/// What an applied instruction did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstructionOutcome {
    Registered { module_id: ModuleId },
    Deregistered { module_id: ModuleId },
    StateUpdated { module_id: ModuleId },
    /// `pushed` is false when the recovery request could not be delivered
    Recovering {
        module_id: ModuleId,
        recovery_state: ModuleState,
        pushed: bool,
    },
    NeededSet { module_id: ModuleId, needed: bool },
}

pub struct InstructionBridge {
    handle: CoordinatorHandle,
    board: Blackboard,
    collection: String,
}

impl InstructionBridge {
    pub fn new(handle: CoordinatorHandle, board: Blackboard, collection: impl Into<String>) -> Self {
        Self {
            handle,
            board,
            collection: collection.into(),
        }
    }

    /// Filters selecting instructions addressed to this equiplet
    pub fn filters(equiplet_id: u32) -> Vec<Filter> {
        vec![Filter::matches(
            "message.destination",
            &format!(r"^(equiplet_{}|\*)$", equiplet_id),
        )]
    }

    /// Subscribe to inserted instructions for this equiplet
    pub fn subscribe(&self, matcher: &Matcher) -> mpsc::Receiver<FeedEntry> {
        let (subscription, rx) = matcher.subscribe(
            self.collection.clone(),
            Operation::Insert,
            Self::filters(self.handle.equiplet_id()),
        );
        info!(subscription = subscription.id, collection = %self.collection, "Instruction bridge subscribed");
        rx
    }

    /// Process delivered instructions until `shutdown` fires or the subscription ends
    pub async fn run(self, mut rx: mpsc::Receiver<FeedEntry>, mut shutdown: mpsc::Receiver<()>) {
        info!("Instruction bridge started");
        loop {
            tokio::select! {
                entry = rx.recv() => {
                    let Some(entry) = entry else {
                        debug!("run: subscription closed");
                        break;
                    };
                    match self.process(&entry).await {
                        Ok(outcome) => info!(seq = entry.seq, ?outcome, "Instruction applied"),
                        Err(e) => warn!(seq = entry.seq, error = %e, "Instruction not applied"),
                    }
                    self.acknowledge(&entry).await;
                }
                _ = shutdown.recv() => {
                    debug!("run: shutdown received");
                    break;
                }
            }
        }
        info!("Instruction bridge stopped");
    }

    /// Apply one instruction entry to the coordinator
    pub async fn process(&self, entry: &FeedEntry) -> Result<InstructionOutcome, InstructionError> {
        let envelope: InstructionEnvelope =
            serde_json::from_value(entry.payload.clone()).map_err(|e| InstructionError::Malformed(e.to_string()))?;
        let message = envelope.message;
        debug!(seq = entry.seq, destination = %message.destination, command = %message.command, "process: called");

        match message.command.as_str() {
            "RegisterModule" => {
                let p: RegisterPayload = parse(message.payload)?;
                let registration = self
                    .handle
                    .register_module(
                        p.module_type,
                        p.is_actor,
                        p.is_needed,
                        Bootstrap::from_fields(&p.package, &p.executable),
                    )
                    .await?;
                Ok(InstructionOutcome::Registered {
                    module_id: registration.module_id,
                })
            }
            "DeregisterModule" => {
                let p: ModulePayload = parse(message.payload)?;
                self.handle.deregister_module(p.module_id).await?;
                Ok(InstructionOutcome::Deregistered { module_id: p.module_id })
            }
            "StateUpdate" => {
                let p: StatePayload = parse(message.payload)?;
                self.handle.state_update(p.module_id, p.state).await?;
                Ok(InstructionOutcome::StateUpdated { module_id: p.module_id })
            }
            "ModuleError" => {
                let p: ErrorPayload = parse(message.payload)?;
                let outcome = self.handle.module_error(p.module_id, p.error_code).await?;
                let pushed = self
                    .handle
                    .request_state_change(outcome.module_id, outcome.recovery_state)
                    .await
                    .is_ok();
                Ok(InstructionOutcome::Recovering {
                    module_id: outcome.module_id,
                    recovery_state: outcome.recovery_state,
                    pushed,
                })
            }
            "SetNeeded" => {
                let p: NeededPayload = parse(message.payload)?;
                self.handle.set_needed(p.module_id, p.needed).await?;
                Ok(InstructionOutcome::NeededSet {
                    module_id: p.module_id,
                    needed: p.needed,
                })
            }
            other => Err(InstructionError::UnknownCommand(other.to_string())),
        }
    }

    /// Remove the processed instruction's document from the collection
    async fn acknowledge(&self, entry: &FeedEntry) {
        let Some(id) = entry.document_id().map(str::to_string) else {
            warn!(seq = entry.seq, "Instruction has no _id, cannot acknowledge");
            return;
        };
        let board = self.board.clone();
        let collection = self.collection.clone();
        let doc = id.clone();
        match tokio::task::spawn_blocking(move || board.acknowledge(&collection, &doc)).await {
            Ok(Ok(Some(_))) => debug!(seq = entry.seq, %id, "acknowledge: removed instruction"),
            Ok(Ok(None)) => debug!(seq = entry.seq, %id, "acknowledge: instruction already removed"),
            Ok(Err(e)) => warn!(seq = entry.seq, %id, error = %e, "Failed to acknowledge instruction"),
            Err(e) => warn!(seq = entry.seq, %id, error = %e, "Acknowledge task failed"),
        }
    }
}

fn parse<T: for<'de> Deserialize<'de>>(payload: Value) -> Result<T, InstructionError> {
    serde_json::from_value(payload).map_err(|e| InstructionError::Malformed(e.to_string()))
}
