//! IPC client for module processes talking to the coordinator

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tracing::debug;

use super::read_line_capped;
use super::messages::{CoordinatorMessage, CoordinatorResponse};
use crate::domain::{Bootstrap, CellState, ModuleId, ModuleState, ModuleSummary, ModuleType};
use crate::router::ErrorOutcome;

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for the coordinator's socket
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl CoordinatorClient {
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Set a custom timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check if the coordinator socket exists
    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Register a module; returns `(equiplet_id, module_id)`
    pub async fn register_module(
        &self,
        module_type: ModuleType,
        is_actor: bool,
        is_needed: bool,
        bootstrap: Option<Bootstrap>,
    ) -> Result<(u32, ModuleId)> {
        debug!(%module_type, is_actor, is_needed, "CoordinatorClient: registering module");
        let (package, executable) = bootstrap.map(|b| (b.package, b.executable)).unwrap_or_default();
        let msg = CoordinatorMessage::RegisterModule {
            module_type,
            is_actor,
            is_needed,
            package,
            executable,
        };
        match self.send_message(msg).await? {
            CoordinatorResponse::Registered {
                equiplet_id,
                module_id,
            } => Ok((equiplet_id, module_id)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn deregister_module(&self, module_id: ModuleId) -> Result<()> {
        debug!(%module_id, "CoordinatorClient: deregistering module");
        self.expect_ok(CoordinatorMessage::DeregisterModule { module_id }).await
    }

    pub async fn get_all_modules(&self) -> Result<Vec<ModuleSummary>> {
        debug!("CoordinatorClient: listing modules");
        match self.send_message(CoordinatorMessage::GetAllModules).await? {
            CoordinatorResponse::Modules { modules } => Ok(modules),
            other => Err(unexpected(other)),
        }
    }

    pub async fn state_update(&self, module_id: ModuleId, state: ModuleState) -> Result<()> {
        debug!(%module_id, %state, "CoordinatorClient: reporting state");
        self.expect_ok(CoordinatorMessage::StateUpdate { module_id, state }).await
    }

    pub async fn module_error(&self, module_id: ModuleId, error_code: i32) -> Result<ErrorOutcome> {
        debug!(%module_id, %error_code, "CoordinatorClient: reporting error");
        match self
            .send_message(CoordinatorMessage::ModuleError { module_id, error_code })
            .await?
        {
            CoordinatorResponse::Recovery {
                module_id,
                recovery_state,
            } => Ok(ErrorOutcome {
                module_id,
                recovery_state,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn set_needed(&self, module_id: ModuleId, needed: bool) -> Result<()> {
        debug!(%module_id, needed, "CoordinatorClient: setting needed");
        self.expect_ok(CoordinatorMessage::SetNeeded { module_id, needed }).await
    }

    pub async fn cell_state(&self) -> Result<CellState> {
        debug!("CoordinatorClient: reading cell state");
        match self.send_message(CoordinatorMessage::GetCellState).await? {
            CoordinatorResponse::Cell { safety, operation } => Ok(CellState { safety, operation }),
            other => Err(unexpected(other)),
        }
    }

    /// Check if the coordinator is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("CoordinatorClient: pinging coordinator");
        match self.send_message(CoordinatorMessage::Ping).await? {
            CoordinatorResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    async fn expect_ok(&self, msg: CoordinatorMessage) -> Result<()> {
        match self.send_message(msg).await? {
            CoordinatorResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    async fn send_message(&self, msg: CoordinatorMessage) -> Result<CoordinatorResponse> {
        debug!(?self.socket_path, ?msg, "CoordinatorClient: sending message");

        let stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to coordinator socket")?;

        tokio::time::timeout(self.timeout, exchange(stream, &msg))
            .await
            .context("Response timeout")?
    }
}

fn unexpected(response: CoordinatorResponse) -> eyre::Report {
    match response {
        CoordinatorResponse::Error { kind, message } => eyre::eyre!("Coordinator error ({}): {}", kind, message),
        other => eyre::eyre!("Unexpected response: {:?}", other),
    }
}

/// Write one request line and read one reply line
pub async fn exchange<Req, Resp>(mut stream: UnixStream, msg: &Req) -> Result<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let mut json = serde_json::to_string(msg).context("Failed to serialize message")?;
    json.push('\n');
    stream
        .write_all(json.as_bytes())
        .await
        .context("Failed to write message")?;
    stream.flush().await.context("Failed to flush message")?;

    let line = read_line_capped(stream).await.context("Failed to read response")?;
    if line.is_empty() {
        return Err(eyre::eyre!("Connection closed without response"));
    }

    serde_json::from_str(line.trim()).context("Failed to parse response")
}
