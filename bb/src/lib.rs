//! Blackboard - append-only change feed with predicate subscriptions
//!
//! Every mutation of a blackboard collection is appended to a feed as a
//! [`FeedEntry`]. Consumers subscribe with an operation kind and a set of
//! field filters; a tailing task hands each new entry to the [`Matcher`],
//! which delivers it once to every active subscription it satisfies.
//!
//! # Architecture
//!
//! ```text
//! writer ──post/remove──▶ Blackboard ──append──▶ FeedStore (jsonl | memory)
//!                                                     │
//!                                          tailer polls read_after(cursor)
//!                                                     ▼
//!                                                  Matcher
//!                                      ┌──────────────┼──────────────┐
//!                                      ▼              ▼              ▼
//!                                 sub #1 rx      sub #2 rx      sub #3 rx
//! ```
//!
//! # Example
//!
//! ```ignore
//! use blackboard::{Blackboard, Filter, Matcher, MemoryFeed, Operation};
//!
//! let feed = Arc::new(MemoryFeed::new());
//! let board = Blackboard::new(feed.clone());
//! let matcher = Matcher::new();
//! let (_handle, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![
//!     Filter::eq("message.destination", "equiplet_1"),
//! ]);
//! board.post("instruction", json!({"message": {"destination": "equiplet_1"}}))?;
//! ```

pub mod cli;
pub mod config;
mod entry;
mod error;
mod filter;
mod matcher;
mod store;
mod tail;

pub use entry::{FeedEntry, Operation};
pub use error::{BlackboardError, MatchFault};
pub use filter::{FieldValue, Filter, FilterOp};
pub use matcher::{DispatchReport, Matcher, SubscriptionHandle, SubscriptionId, SubscriptionState};
pub use store::{Blackboard, FeedStore, JsonlFeed, MemoryFeed};
pub use tail::{TailConfig, spawn_tailer};

/// Field holding a document's identifier inside a feed payload
pub const ID_FIELD: &str = "_id";

/// Default capacity of a subscription's delivery channel
pub const DEFAULT_DELIVERY_CAPACITY: usize = 256;

/// Default number of entries a subscription may park beyond its channel
pub const DEFAULT_BACKLOG_LIMIT: usize = 4096;
