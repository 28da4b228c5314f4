//! Equiplet configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use blackboard::TailConfig;

use crate::coordinator::CoordinatorConfig;
use crate::instructions::DEFAULT_INSTRUCTION_COLLECTION;
use crate::supervisor::SupervisorConfig;

/// Main equiplet configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level used when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Registry and routing behaviour
    pub coordinator: CoordinatorConfig,

    /// Local socket endpoints
    pub ipc: IpcConfig,

    /// Module process launching
    pub supervisor: SupervisorConfig,

    /// Instruction feed
    pub blackboard: BlackboardConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Try working-directory config: equiplet.yml
        let local_config = PathBuf::from("equiplet.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // Try user config: ~/.config/equiplet/equiplet.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("equiplet").join("equiplet.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only `log-level`, before logging is set up
    ///
    /// Any failure yields `None`; the full load reports it later.
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let candidates = match config_path {
            Some(path) => vec![path.clone()],
            None => {
                let mut paths = vec![PathBuf::from("equiplet.yml")];
                if let Some(config_dir) = dirs::config_dir() {
                    paths.push(config_dir.join("equiplet").join("equiplet.yml"));
                }
                paths
            }
        };

        let path = candidates.into_iter().find(|p| p.exists())?;
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// Socket configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IpcConfig {
    /// Directory holding the coordinator and module sockets
    #[serde(rename = "socket-dir")]
    pub socket_dir: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            socket_dir: crate::ipc::default_socket_dir(),
        }
    }
}

/// Instruction feed configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BlackboardConfig {
    /// Consume instructions from the feed
    pub enabled: bool,

    /// Feed file shared with `bb`
    #[serde(rename = "feed-path")]
    pub feed_path: PathBuf,

    /// Collection holding instructions
    pub collection: String,

    pub tail: TailConfig,
}

impl Default for BlackboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_path: blackboard::config::default_feed_path(),
            collection: DEFAULT_INSTRUCTION_COLLECTION.to_string(),
            tail: TailConfig::default(),
        }
    }
}
