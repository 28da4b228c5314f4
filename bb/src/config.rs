//! Configuration for the bb tool

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::tail::TailConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the feed file
    #[serde(default = "default_feed_path", rename = "feed-path")]
    pub feed_path: PathBuf,

    /// Tailing behaviour for `bb tail`
    #[serde(default)]
    pub tail: TailConfig,
}

/// Feed location shared by `bb` and the coordinator unless configured otherwise
pub fn default_feed_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("blackboard")
        .join("feed.jsonl")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            feed_path: default_feed_path(),
            tail: TailConfig::default(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("blackboard").join("bb.yml")),
            Some(PathBuf::from("bb.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("bb.yml");
        let config = Config {
            feed_path: temp.path().join("feed.jsonl"),
            tail: TailConfig {
                poll_interval_ms: 20,
                ..Default::default()
            },
        };
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded.feed_path, config.feed_path);
        assert_eq!(loaded.tail.poll_interval_ms, 20);
    }

    #[test]
    fn test_missing_keys_use_defaults() {
        let config: Config = serde_yaml::from_str("tail:\n  from-start: true\n").unwrap();
        assert_eq!(config.feed_path, default_feed_path());
        assert!(config.tail.from_start);
    }
}
