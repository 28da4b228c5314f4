//! Cell events broadcast by the coordinator
//!
//! Fire-and-forget: with no subscribers an event is simply dropped, and a slow
//! subscriber loses the oldest events rather than holding up the coordinator.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::domain::{CellState, ModuleId, ModuleState, ModuleType};

/// Default capacity of the event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum CellEvent {
    ModuleRegistered {
        module_id: ModuleId,
        module_type: ModuleType,
        at: DateTime<Utc>,
    },
    ModuleDeregistered {
        module_id: ModuleId,
        at: DateTime<Utc>,
    },
    ModuleStateChanged {
        module_id: ModuleId,
        previous: ModuleState,
        current: ModuleState,
        at: DateTime<Utc>,
    },
    ModuleErrored {
        module_id: ModuleId,
        error_code: i32,
        recovery_state: ModuleState,
        at: DateTime<Utc>,
    },
    CellStateChanged {
        previous: CellState,
        current: CellState,
        at: DateTime<Utc>,
    },
    TransportFailed {
        module_id: ModuleId,
        reason: String,
        at: DateTime<Utc>,
    },
}

impl CellEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            CellEvent::ModuleRegistered { .. } => "ModuleRegistered",
            CellEvent::ModuleDeregistered { .. } => "ModuleDeregistered",
            CellEvent::ModuleStateChanged { .. } => "ModuleStateChanged",
            CellEvent::ModuleErrored { .. } => "ModuleErrored",
            CellEvent::CellStateChanged { .. } => "CellStateChanged",
            CellEvent::TransportFailed { .. } => "TransportFailed",
        }
    }
}

/// Log every event until the channel closes
pub async fn log_events(mut rx: broadcast::Receiver<CellEvent>) {
    debug!("log_events: called");
    loop {
        match rx.recv().await {
            Ok(CellEvent::CellStateChanged { previous, current, .. }) => {
                info!(%previous, %current, "Cell state changed");
            }
            Ok(CellEvent::TransportFailed { module_id, reason, .. }) => {
                warn!(%module_id, %reason, "Module unreachable");
            }
            Ok(event) => {
                let payload = serde_json::to_string(&event).unwrap_or_default();
                info!(event_type = event.event_type(), %payload, "Cell event");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event logger lagged behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("log_events: channel closed");
}
