//! Outbound transport to module control endpoints

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eyre::Result;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, warn};

use crate::domain::{ModuleId, ModuleState};
use crate::error::TransportError;
use crate::ipc::client::exchange;
use crate::ipc::listener::{read_message, send_response};
use crate::ipc::messages::{ModuleMessage, ModuleResponse};
use crate::ipc::{endpoint_name, module_socket_path};

/// Delivers state change requests to modules
#[async_trait]
pub trait ModuleTransport: Send + Sync {
    async fn request_state_change(
        &self,
        equiplet_id: u32,
        module_id: ModuleId,
        desired_state: ModuleState,
    ) -> Result<(), TransportError>;
}

/// Talks to each module over its `RequestStateChange_<equipletId>_<moduleId>` socket
#[derive(Debug, Clone)]
pub struct SocketTransport {
    socket_dir: PathBuf,
    timeout: Duration,
}

impl SocketTransport {
    pub fn new(socket_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            socket_dir: socket_dir.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ModuleTransport for SocketTransport {
    async fn request_state_change(
        &self,
        equiplet_id: u32,
        module_id: ModuleId,
        desired_state: ModuleState,
    ) -> Result<(), TransportError> {
        let path = module_socket_path(&self.socket_dir, equiplet_id, module_id);
        debug!(?path, %desired_state, "SocketTransport::request_state_change: called");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&path))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|source| TransportError::Connect {
                endpoint: endpoint_name(equiplet_id, module_id),
                source,
            })?;

        let msg = ModuleMessage::RequestStateChange { desired_state };
        let response: ModuleResponse = tokio::time::timeout(self.timeout, exchange(stream, &msg))
            .await
            .map_err(|_| TransportError::Timeout(self.timeout))?
            .map_err(|e| TransportError::Protocol(e.to_string()))?;

        match response {
            ModuleResponse::Ok => Ok(()),
            ModuleResponse::Error { message } => Err(TransportError::Rejected(message)),
        }
    }
}

/// Serve a module's control endpoint, calling `handler` for every request
///
/// Used by module processes; runs until the listener fails.
pub async fn serve_module_endpoint<F>(listener: UnixListener, handler: F) -> Result<()>
where
    F: Fn(ModuleState) -> Result<(), String> + Send + Sync + 'static,
{
    let handler = Arc::new(handler);
    loop {
        let (mut stream, _) = listener.accept().await?;
        let handler = handler.clone();
        tokio::spawn(async move {
            let response = match read_message::<ModuleMessage>(&mut stream).await {
                Ok(ModuleMessage::RequestStateChange { desired_state }) => match handler(desired_state) {
                    Ok(()) => ModuleResponse::Ok,
                    Err(message) => ModuleResponse::Error { message },
                },
                Err(e) => ModuleResponse::Error { message: e.to_string() },
            };
            if let Err(e) = send_response(&mut stream, &response).await {
                warn!(error = %e, "Failed to answer state change request");
            }
        });
    }
}

/// In-memory transport for tests
pub mod mock {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every request; modules listed as unreachable fail
    #[derive(Default)]
    pub struct RecordingTransport {
        requests: Mutex<Vec<(u32, ModuleId, ModuleState)>>,
        unreachable: Mutex<HashSet<ModuleId>>,
        delay: Option<Duration>,
    }

    impl RecordingTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Every request sleeps for `delay` before answering
        pub fn with_delay(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Default::default()
            }
        }

        pub fn set_unreachable(&self, module_id: ModuleId) {
            if let Ok(mut unreachable) = self.unreachable.lock() {
                unreachable.insert(module_id);
            }
        }

        pub fn requests(&self) -> Vec<(u32, ModuleId, ModuleState)> {
            self.requests.lock().map(|r| r.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl ModuleTransport for RecordingTransport {
        async fn request_state_change(
            &self,
            equiplet_id: u32,
            module_id: ModuleId,
            desired_state: ModuleState,
        ) -> Result<(), TransportError> {
            debug!(%equiplet_id, %module_id, %desired_state, "RecordingTransport::request_state_change: called");
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if let Ok(mut requests) = self.requests.lock() {
                requests.push((equiplet_id, module_id, desired_state));
            }
            let unreachable = self.unreachable.lock().map(|u| u.contains(&module_id)).unwrap_or(false);
            if unreachable {
                return Err(TransportError::Rejected(format!(
                    "module {} unreachable",
                    endpoint_name(equiplet_id, module_id)
                )));
            }
            Ok(())
        }
    }
}
