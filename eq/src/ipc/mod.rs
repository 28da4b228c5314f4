//! Inter-Process Communication between modules and the coordinator
//!
//! Unix Domain Sockets carrying one JSON line per request and one per reply.
//! The coordinator listens on `equiplet_<id>.sock`; every module listens on
//! its own `RequestStateChange_<equipletId>_<moduleId>.sock` for commands.

use std::path::{Path, PathBuf};

use eyre::Result;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

pub mod client;
pub mod listener;
pub mod messages;

pub use client::CoordinatorClient;
pub use listener::{cleanup_socket, create_listener_at, handle_message, serve};
pub use messages::{CoordinatorMessage, CoordinatorResponse, ModuleMessage, ModuleResponse};

use crate::domain::ModuleId;

/// Maximum size of one message line
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Read one line, giving up once it runs past `MAX_MESSAGE_SIZE` bytes
///
/// Returns an empty string when the peer closed without sending anything.
pub(crate) async fn read_line_capped<R: AsyncRead + Unpin>(reader: R) -> Result<String> {
    let mut reader = BufReader::new(reader.take(MAX_MESSAGE_SIZE as u64 + 1));
    let mut line = String::new();
    let bytes_read = reader.read_line(&mut line).await?;
    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: over {} bytes", MAX_MESSAGE_SIZE));
    }
    Ok(line)
}

/// Default directory for coordinator and module sockets
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("equiplet")
}

/// Socket the coordinator of `equiplet_id` listens on
pub fn coordinator_socket_path(socket_dir: &Path, equiplet_id: u32) -> PathBuf {
    socket_dir.join(format!("equiplet_{}.sock", equiplet_id))
}

/// Name a module's control endpoint is addressed by
pub fn endpoint_name(equiplet_id: u32, module_id: ModuleId) -> String {
    format!("{}_{}", equiplet_id, module_id)
}

/// Socket a module listens on for state change requests
pub fn module_socket_path(socket_dir: &Path, equiplet_id: u32, module_id: ModuleId) -> PathBuf {
    socket_dir.join(format!("RequestStateChange_{}.sock", endpoint_name(equiplet_id, module_id)))
}
