//! CLI argument parsing for bb

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "bb")]
#[command(author, version, about = "Post to and inspect a blackboard change feed", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Feed file (overrides config)
    #[arg(short, long)]
    pub feed: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Insert a JSON document into a collection
    Post {
        /// Collection name
        #[arg(required = true)]
        collection: String,

        /// Document as JSON
        #[arg(required = true)]
        document: String,
    },

    /// List live documents of a collection
    List {
        /// Collection name
        #[arg(required = true)]
        collection: String,
    },

    /// Remove a processed document (the oldest one unless --id is given)
    Ack {
        /// Collection name
        #[arg(required = true)]
        collection: String,

        /// `_id` of the document to remove
        #[arg(long)]
        id: Option<String>,
    },

    /// Print a collection's feed entries as they are appended
    Tail {
        /// Collection name
        #[arg(required = true)]
        collection: String,

        /// Replay the feed from its first entry
        #[arg(long)]
        from_start: bool,
    },
}
