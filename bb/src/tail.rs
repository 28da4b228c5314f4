//! Feed tailer - long-lived task that feeds new entries to a matcher

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::matcher::Matcher;
use crate::store::FeedStore;

/// Tailer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TailConfig {
    /// How often to poll the store for new entries
    #[serde(default = "default_poll_interval_ms", rename = "poll-interval-ms")]
    pub poll_interval_ms: u64,

    /// Maximum entries read per poll
    #[serde(default = "default_batch_size", rename = "batch-size")]
    pub batch_size: usize,

    /// Replay the whole feed instead of starting at its current end
    #[serde(default, rename = "from-start")]
    pub from_start: bool,
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_batch_size() -> usize {
    512
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            batch_size: default_batch_size(),
            from_start: false,
        }
    }
}

impl TailConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Spawn the tailing task
///
/// Entries are dispatched one at a time in feed order, and entries parked for
/// slow subscribers are retried on every tick. Store errors are logged
/// and retried on the next tick. The task ends when `shutdown` fires or its
/// sender is dropped, returning the last dispatched `seq`.
pub fn spawn_tailer(
    store: Arc<dyn FeedStore>,
    matcher: Matcher,
    config: TailConfig,
    mut shutdown: mpsc::Receiver<()>,
) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut cursor = if config.from_start {
            0
        } else {
            match read_last_seq(store.clone()).await {
                Ok(seq) => seq,
                Err(e) => {
                    warn!(error = %e, "Could not read feed end, replaying from start");
                    0
                }
            }
        };
        info!(cursor, poll_interval_ms = config.poll_interval_ms, "Feed tailer started");

        let mut interval = tokio::time::interval(config.poll_interval());
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let parked = matcher.flush();
                    if parked > 0 {
                        debug!(parked, "spawn_tailer: entries still parked for slow subscribers");
                    }
                    let batch = {
                        let store = store.clone();
                        let limit = config.batch_size.max(1);
                        tokio::task::spawn_blocking(move || store.read_after(cursor, limit)).await
                    };
                    let entries = match batch {
                        Ok(Ok(entries)) => entries,
                        Ok(Err(e)) => {
                            warn!(cursor, error = %e, "Feed read failed, retrying next tick");
                            continue;
                        }
                        Err(e) => {
                            warn!(cursor, error = %e, "Feed read task failed, retrying next tick");
                            continue;
                        }
                    };
                    for entry in entries {
                        let report = matcher.dispatch(&entry);
                        debug!(
                            seq = entry.seq,
                            delivered = report.delivered.len(),
                            parked = report.parked.len(),
                            faults = report.faults.len(),
                            "Dispatched feed entry"
                        );
                        cursor = entry.seq;
                    }
                }
                _ = shutdown.recv() => {
                    debug!(cursor, "spawn_tailer: shutdown received");
                    break;
                }
            }
        }

        info!(cursor, "Feed tailer stopped");
        cursor
    })
}

async fn read_last_seq(store: Arc<dyn FeedStore>) -> eyre::Result<u64> {
    Ok(tokio::task::spawn_blocking(move || store.last_seq()).await??)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Operation;
    use crate::store::{Blackboard, MemoryFeed};
    use serde_json::json;

    fn fast() -> TailConfig {
        TailConfig {
            poll_interval_ms: 5,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_tailer_skips_history_by_default() {
        let feed = Arc::new(MemoryFeed::new());
        let board = Blackboard::new(feed.clone());
        board.post("instruction", json!({"n": "old"})).unwrap();

        let matcher = Matcher::new();
        let (_h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let task = spawn_tailer(feed.clone(), matcher, fast(), stop_rx);

        tokio::time::sleep(Duration::from_millis(30)).await;
        board.post("instruction", json!({"n": "new"})).unwrap();

        let entry = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(entry.payload["n"], "new");

        stop_tx.send(()).await.unwrap();
        assert_eq!(task.await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_tailer_replays_from_start() {
        let feed = Arc::new(MemoryFeed::new());
        let board = Blackboard::new(feed.clone());
        for n in 0..3 {
            board.post("instruction", json!({ "n": n })).unwrap();
        }

        let matcher = Matcher::new();
        let (_h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        let (stop_tx, stop_rx) = mpsc::channel(1);
        let config = TailConfig {
            from_start: true,
            ..fast()
        };
        let task = spawn_tailer(feed, matcher, config, stop_rx);

        for n in 0..3 {
            let entry = tokio::time::timeout(Duration::from_secs(2), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(entry.payload["n"], n);
        }

        drop(stop_tx);
        assert_eq!(task.await.unwrap(), 3);
    }

    #[test]
    fn test_tail_config_defaults_from_yaml() {
        let config: TailConfig = serde_yaml::from_str("poll-interval-ms: 250").unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert_eq!(config.batch_size, 512);
        assert!(!config.from_start);
    }
}
