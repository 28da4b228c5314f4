//! CLI argument parsing for eq

use clap::Parser;
use std::path::PathBuf;
use tracing::warn;

/// Equiplet id used when none (or garbage) is given
pub const DEFAULT_EQUIPLET_ID: u32 = 1;

/// Equiplet coordinator - module registry and cell safety state
#[derive(Parser, Debug)]
#[command(name = "eq", version, about = "Run the coordinator of one equiplet", long_about = None)]
pub struct Cli {
    /// Equiplet id (defaults to 1)
    #[arg(value_name = "EQUIPLET_ID")]
    pub equiplet_id: Option<String>,

    /// Path to config file
    #[arg(short, long, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(short = 'l', long = "log-level", help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)")]
    pub log_level: Option<String>,
}

impl Cli {
    /// The equiplet id to run as; a missing or unparsable argument falls back to 1
    pub fn resolve_equiplet_id(&self) -> u32 {
        match self.equiplet_id.as_deref().map(str::parse::<u32>) {
            Some(Ok(id)) => id,
            Some(Err(_)) => {
                warn!(
                    argument = self.equiplet_id.as_deref().unwrap_or_default(),
                    "Invalid equiplet id, using {}", DEFAULT_EQUIPLET_ID
                );
                DEFAULT_EQUIPLET_ID
            }
            None => {
                warn!("No equiplet id given, using {}", DEFAULT_EQUIPLET_ID);
                DEFAULT_EQUIPLET_ID
            }
        }
    }
}
