//! IPC listener for the coordinator side
//!
//! Provides helpers for creating the Unix Domain Socket listener and the
//! accept loop that turns each request into a coordinator call.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::read_line_capped;
use super::messages::{CoordinatorMessage, CoordinatorResponse};
use crate::coordinator::CoordinatorHandle;
use crate::domain::Bootstrap;
use crate::error::CoordError;

/// Create a listener at `socket_path`
///
/// Handles cleanup of stale socket files from previous runs.
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener_at: creating IPC socket");

    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener_at: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    debug!(?socket_path, "create_listener_at: socket bound successfully");

    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

/// Read one JSON line from the stream
pub async fn read_message<T: DeserializeOwned + std::fmt::Debug>(stream: &mut UnixStream) -> Result<T> {
    let line = read_line_capped(stream).await.context("Failed to read IPC message")?;

    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let msg: T = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?msg, "read_message: parsed message");

    Ok(msg)
}

/// Send a response on the stream
pub async fn send_response<T: Serialize + std::fmt::Debug>(stream: &mut UnixStream, response: &T) -> Result<()> {
    let response_json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream
        .write_all(response_json.as_bytes())
        .await
        .context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    debug!(?response, "send_response: sent response");
    Ok(())
}

/// Apply one inbound message to the coordinator
pub async fn handle_message(handle: &CoordinatorHandle, msg: CoordinatorMessage) -> CoordinatorResponse {
    debug!(?msg, "handle_message: called");
    let result = match msg {
        CoordinatorMessage::RegisterModule {
            module_type,
            is_actor,
            is_needed,
            package,
            executable,
        } => handle
            .register_module(module_type, is_actor, is_needed, Bootstrap::from_fields(&package, &executable))
            .await
            .map(|r| CoordinatorResponse::Registered {
                equiplet_id: r.equiplet_id,
                module_id: r.module_id,
            }),
        CoordinatorMessage::DeregisterModule { module_id } => handle
            .deregister_module(module_id)
            .await
            .map(|_| CoordinatorResponse::Ok),
        CoordinatorMessage::GetAllModules => handle
            .get_all_modules()
            .await
            .map(|modules| CoordinatorResponse::Modules { modules }),
        CoordinatorMessage::StateUpdate { module_id, state } => handle
            .state_update(module_id, state)
            .await
            .map(|_| CoordinatorResponse::Ok),
        CoordinatorMessage::ModuleError { module_id, error_code } => {
            handle.module_error(module_id, error_code).await.map(|outcome| {
                // Pushed after the reply is on its way; the module may be waiting on it
                let pusher = handle.clone();
                tokio::spawn(async move {
                    let _ = pusher
                        .request_state_change(outcome.module_id, outcome.recovery_state)
                        .await;
                });
                CoordinatorResponse::Recovery {
                    module_id: outcome.module_id,
                    recovery_state: outcome.recovery_state,
                }
            })
        }
        CoordinatorMessage::SetNeeded { module_id, needed } => handle
            .set_needed(module_id, needed)
            .await
            .map(|_| CoordinatorResponse::Ok),
        CoordinatorMessage::GetCellState => handle.cell_state().await.map(|cell| CoordinatorResponse::Cell {
            safety: cell.safety,
            operation: cell.operation,
        }),
        CoordinatorMessage::Ping => Ok(CoordinatorResponse::Pong {
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    };

    result.unwrap_or_else(|e: CoordError| CoordinatorResponse::Error {
        kind: e.kind().to_string(),
        message: e.to_string(),
    })
}

/// Accept connections until `shutdown` fires; each connection is served on its own task
pub async fn serve(listener: UnixListener, handle: CoordinatorHandle, mut shutdown: mpsc::Receiver<()>) {
    info!("IPC listener started");
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _)) => {
                        let handle = handle.clone();
                        tokio::spawn(serve_connection(stream, handle));
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept IPC connection");
                    }
                }
            }
            _ = shutdown.recv() => {
                debug!("serve: shutdown received");
                break;
            }
        }
    }
    info!("IPC listener stopped");
}

async fn serve_connection(mut stream: UnixStream, handle: CoordinatorHandle) {
    let response = match read_message::<CoordinatorMessage>(&mut stream).await {
        Ok(msg) => handle_message(&handle, msg).await,
        Err(e) => {
            warn!(error = %e, "Rejecting malformed IPC message");
            CoordinatorResponse::Error {
                kind: "InvalidMessage".to_string(),
                message: e.to_string(),
            }
        }
    };
    if let Err(e) = send_response(&mut stream, &response).await {
        warn!(error = %e, "Failed to send IPC response");
    }
}
