//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::events::DEFAULT_EVENT_CAPACITY;
use crate::router::DEFAULT_ERROR_STATE_DROP;

/// Coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Timeout for outbound requests to modules, in milliseconds
    #[serde(default = "default_request_timeout_ms", rename = "request-timeout-ms")]
    pub request_timeout_ms: u64,

    /// Severity levels dropped when a module reports an error
    #[serde(default = "default_error_state_drop", rename = "error-state-drop")]
    pub error_state_drop: u8,

    /// Channel buffer size for coordinator requests
    #[serde(default = "default_channel_buffer", rename = "channel-buffer")]
    pub channel_buffer: usize,

    /// Capacity of the cell event broadcast channel
    #[serde(default = "default_event_buffer", rename = "event-buffer")]
    pub event_buffer: usize,
}

fn default_request_timeout_ms() -> u64 {
    debug!("default_request_timeout_ms: called");
    2000
}

fn default_error_state_drop() -> u8 {
    DEFAULT_ERROR_STATE_DROP
}

fn default_channel_buffer() -> usize {
    debug!("default_channel_buffer: called");
    256
}

fn default_event_buffer() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        debug!("CoordinatorConfig::default: called");
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            error_state_drop: default_error_state_drop(),
            channel_buffer: default_channel_buffer(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl CoordinatorConfig {
    /// Outbound request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}
