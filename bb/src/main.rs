use std::sync::Arc;

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;

use blackboard::cli::{Cli, Command};
use blackboard::config::Config;
use blackboard::{Blackboard, JsonlFeed, Matcher, Operation, TailConfig, spawn_tailer};

fn setup_logging() -> Result<()> {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Warn)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    let feed_path = cli.feed.unwrap_or(config.feed_path);

    info!("bb using feed {}", feed_path.display());
    let feed = Arc::new(JsonlFeed::open(&feed_path).context("Failed to open feed")?);
    let board = Blackboard::new(feed.clone());

    match cli.command {
        Command::Post { collection, document } => {
            let document: serde_json::Value = serde_json::from_str(&document).context("Document is not valid JSON")?;
            let entry = board.post(&collection, document)?;
            println!(
                "{} Posted {} to {} (seq {})",
                "✓".green(),
                entry.document_id().unwrap_or("-").cyan(),
                collection,
                entry.seq
            );
        }
        Command::List { collection } => {
            let documents = board.documents(&collection)?;
            if documents.is_empty() {
                println!("No documents in {}", collection);
            } else {
                for doc in documents {
                    println!("{}", doc);
                }
            }
        }
        Command::Ack { collection, id } => {
            let removed = match &id {
                Some(id) => board.acknowledge(&collection, id)?,
                None => board.acknowledge_oldest(&collection)?,
            };
            match (removed, id) {
                (Some(doc), _) => println!("{} Removed {}", "✓".green(), doc),
                (None, Some(id)) => println!("No document {} in {}", id, collection),
                (None, None) => println!("No documents in {}", collection),
            }
        }
        Command::Tail { collection, from_start } => {
            let matcher = Matcher::new();
            let (tx, mut rx) = tokio::sync::mpsc::channel(256);
            for op in [Operation::Insert, Operation::Update, Operation::Delete] {
                let (_handle, mut sub_rx) = matcher.subscribe(&collection, op, vec![]);
                let tx = tx.clone();
                tokio::spawn(async move {
                    while let Some(entry) = sub_rx.recv().await {
                        if tx.send(entry).await.is_err() {
                            break;
                        }
                    }
                });
            }
            drop(tx);

            let (_stop_tx, stop_rx) = tokio::sync::mpsc::channel(1);
            let tail_config = TailConfig {
                from_start,
                ..config.tail
            };
            let _tailer = spawn_tailer(feed, matcher, tail_config, stop_rx);

            loop {
                tokio::select! {
                    entry = rx.recv() => {
                        let Some(entry) = entry else { break };
                        println!(
                            "{} {} {}",
                            entry.seq.to_string().dimmed(),
                            entry.operation.to_string().yellow(),
                            entry.payload
                        );
                    }
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
        }
    }

    Ok(())
}
