//! Subscription matcher - routes feed entries to interested subscribers
//!
//! Each subscription is a small state machine (Active -> Cancelled) holding a
//! collection, an operation kind, a set of filters and a delivery cursor. The
//! cursor makes delivery at-most-once: an entry whose `seq` is not beyond the
//! cursor is never delivered to that subscription again.
//!
//! Delivery never waits on a subscriber. An entry that does not fit in a full
//! channel is parked in that subscription's backlog and handed over on a later
//! dispatch or [`Matcher::flush`]; when the backlog is over its limit the
//! oldest parked entry is dropped.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};

use crate::entry::{FeedEntry, Operation};
use crate::error::MatchFault;
use crate::filter::Filter;

/// Identifier of a subscription within one matcher
pub type SubscriptionId = u64;

/// Lifecycle of a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Cancelled,
}

/// Returned by [`Matcher::subscribe`]; pass it back to cancel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    pub collection: String,
}

struct Subscription {
    id: SubscriptionId,
    collection: String,
    operation: Operation,
    filters: Vec<Filter>,
    cursor: u64,
    tx: mpsc::Sender<FeedEntry>,
    backlog: VecDeque<FeedEntry>,
}

enum Offer {
    Delivered,
    Parked,
    /// Parked, pushing out the oldest parked entry
    Overflowed(FeedEntry),
    Closed,
}

impl Subscription {
    fn matches(&self, entry: &FeedEntry) -> Result<bool, MatchFault> {
        if entry.collection != self.collection || entry.operation != self.operation {
            return Ok(false);
        }
        for filter in &self.filters {
            if !filter.evaluate(&entry.payload)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Move parked entries into the channel while it has room; false once the receiver is gone
    fn drain(&mut self) -> bool {
        while let Some(entry) = self.backlog.pop_front() {
            match self.tx.try_send(entry) {
                Ok(()) => {}
                Err(TrySendError::Full(entry)) => {
                    self.backlog.push_front(entry);
                    return true;
                }
                Err(TrySendError::Closed(_)) => return false,
            }
        }
        !self.tx.is_closed()
    }

    fn offer(&mut self, entry: &FeedEntry, backlog_limit: usize) -> Offer {
        if !self.drain() {
            return Offer::Closed;
        }
        if self.backlog.is_empty() {
            match self.tx.try_send(entry.clone()) {
                Ok(()) => return Offer::Delivered,
                Err(TrySendError::Closed(_)) => return Offer::Closed,
                Err(TrySendError::Full(entry)) => self.backlog.push_back(entry),
            }
        } else {
            self.backlog.push_back(entry.clone());
        }
        if self.backlog.len() > backlog_limit
            && let Some(oldest) = self.backlog.pop_front()
        {
            return Offer::Overflowed(oldest);
        }
        Offer::Parked
    }
}

/// Outcome of dispatching one entry
#[derive(Debug, Default, Clone, PartialEq)]
pub struct DispatchReport {
    /// Subscriptions whose channel accepted the entry, in subscription order
    pub delivered: Vec<SubscriptionId>,
    /// Subscriptions whose channel was full; the entry waits in their backlog
    pub parked: Vec<SubscriptionId>,
    /// Entries pushed out of a full backlog, by `seq`
    pub dropped: Vec<(SubscriptionId, u64)>,
    /// Subscriptions whose filters faulted on the entry
    pub faults: Vec<(SubscriptionId, MatchFault)>,
}

#[derive(Default)]
struct Inner {
    next_id: SubscriptionId,
    subscriptions: Vec<Subscription>,
}

/// Shared matcher; clones refer to the same subscription table
///
/// `dispatch` is meant to be driven by a single tailing task so that entries
/// reach each subscription in feed order.
#[derive(Clone)]
pub struct Matcher {
    inner: Arc<Mutex<Inner>>,
    capacity: usize,
    backlog_limit: usize,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Matcher {
    pub fn new() -> Self {
        Self::with_capacity(crate::DEFAULT_DELIVERY_CAPACITY)
    }

    /// Create a matcher whose delivery channels hold `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        debug!(capacity, "Matcher::with_capacity: called");
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            capacity: capacity.max(1),
            backlog_limit: crate::DEFAULT_BACKLOG_LIMIT,
        }
    }

    /// Number of entries a subscription may have parked beyond its channel
    pub fn with_backlog_limit(mut self, limit: usize) -> Self {
        self.backlog_limit = limit;
        self
    }

    /// Subscribe to `operation` entries on `collection` satisfying all `filters`
    pub fn subscribe(
        &self,
        collection: impl Into<String>,
        operation: Operation,
        filters: Vec<Filter>,
    ) -> (SubscriptionHandle, mpsc::Receiver<FeedEntry>) {
        let collection = collection.into();
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut inner = self.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        info!(id, %collection, %operation, filters = filters.len(), "Subscription created");
        inner.subscriptions.push(Subscription {
            id,
            collection: collection.clone(),
            operation,
            filters,
            cursor: 0,
            tx,
            backlog: VecDeque::new(),
        });
        (SubscriptionHandle { id, collection }, rx)
    }

    /// Cancel a subscription and drop it from the table
    ///
    /// Returns false if it was unknown or already cancelled. Once this returns
    /// nothing more is sent to the subscription's channel.
    pub fn cancel(&self, handle: &SubscriptionHandle) -> bool {
        debug!(id = handle.id, "Matcher::cancel: called");
        let mut inner = self.lock();
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != handle.id);
        let removed = inner.subscriptions.len() < before;
        if removed {
            info!(id = handle.id, "Subscription cancelled");
        }
        removed
    }

    /// `None` for an id this matcher never issued
    pub fn state(&self, handle: &SubscriptionHandle) -> Option<SubscriptionState> {
        let inner = self.lock();
        if handle.id == 0 || handle.id > inner.next_id {
            return None;
        }
        if inner.subscriptions.iter().any(|s| s.id == handle.id) {
            Some(SubscriptionState::Active)
        } else {
            Some(SubscriptionState::Cancelled)
        }
    }

    pub fn active_count(&self) -> usize {
        self.lock().subscriptions.len()
    }

    /// Entries parked across all subscriptions
    pub fn parked_count(&self) -> usize {
        self.lock().subscriptions.iter().map(|s| s.backlog.len()).sum()
    }

    /// Offer one entry to every active subscription
    ///
    /// Cursors advance before delivery, so a repeated dispatch never delivers
    /// the same entry twice. A subscription whose receiver is gone is
    /// cancelled.
    pub fn dispatch(&self, entry: &FeedEntry) -> DispatchReport {
        debug!(seq = entry.seq, collection = %entry.collection, operation = %entry.operation, "Matcher::dispatch: called");
        let mut report = DispatchReport::default();
        let mut closed = Vec::new();

        let mut inner = self.lock();
        for sub in inner.subscriptions.iter_mut() {
            if entry.seq <= sub.cursor {
                continue;
            }
            match sub.matches(entry) {
                Ok(true) => {
                    sub.cursor = entry.seq;
                    match sub.offer(entry, self.backlog_limit) {
                        Offer::Delivered => report.delivered.push(sub.id),
                        Offer::Parked => {
                            debug!(subscription = sub.id, seq = entry.seq, backlog = sub.backlog.len(), "Subscriber channel full, parking entry");
                            report.parked.push(sub.id);
                        }
                        Offer::Overflowed(oldest) => {
                            warn!(subscription = sub.id, seq = oldest.seq, "Subscriber backlog full, dropping oldest parked entry");
                            report.parked.push(sub.id);
                            report.dropped.push((sub.id, oldest.seq));
                        }
                        Offer::Closed => closed.push(sub.id),
                    }
                }
                Ok(false) => {}
                Err(fault) => {
                    warn!(subscription = sub.id, seq = entry.seq, error = %fault, "Skipping entry for subscription");
                    report.faults.push((sub.id, fault));
                }
            }
        }
        Self::remove_closed(&mut inner, &closed);

        report
    }

    /// Hand parked entries to subscribers that have made room
    ///
    /// Returns how many entries are still parked.
    pub fn flush(&self) -> usize {
        let mut inner = self.lock();
        let mut closed = Vec::new();
        for sub in inner.subscriptions.iter_mut() {
            if !sub.backlog.is_empty() && !sub.drain() {
                closed.push(sub.id);
            }
        }
        Self::remove_closed(&mut inner, &closed);
        inner.subscriptions.iter().map(|s| s.backlog.len()).sum()
    }

    fn remove_closed(inner: &mut Inner, closed: &[SubscriptionId]) {
        if closed.is_empty() {
            return;
        }
        for id in closed {
            warn!(subscription = id, "Subscriber dropped its receiver, cancelling");
        }
        inner.subscriptions.retain(|s| !closed.contains(&s.id));
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the table half-written
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterOp;
    use serde_json::json;

    fn entry(seq: u64, op: Operation, payload: serde_json::Value) -> FeedEntry {
        FeedEntry::new(seq, op, "instruction", payload)
    }

    #[tokio::test]
    async fn test_delivers_matching_entries_in_feed_order() {
        let matcher = Matcher::new();
        let (_h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![Filter::eq("dest", "a")]);

        let entries = vec![
            entry(1, Operation::Insert, json!({"dest": "a", "n": 1})),
            entry(2, Operation::Insert, json!({"dest": "b", "n": 2})),
            entry(3, Operation::Update, json!({"dest": "a", "n": 3})),
            entry(4, Operation::Insert, json!({"dest": "a", "n": 4})),
        ];
        for e in &entries {
            matcher.dispatch(e);
        }

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert_eq!(rx.recv().await.unwrap().seq, 4);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_redelivery_is_suppressed() {
        let matcher = Matcher::new();
        let (h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);

        let e = entry(7, Operation::Insert, json!({}));
        let first = matcher.dispatch(&e);
        let second = matcher.dispatch(&e);
        assert_eq!(first.delivered, vec![h.id]);
        assert!(second.delivered.is_empty());

        // An older entry arriving late is also dropped
        matcher.dispatch(&entry(3, Operation::Insert, json!({})));

        assert_eq!(rx.recv().await.unwrap().seq, 7);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_fault_is_isolated_per_subscription_and_entry() {
        let matcher = Matcher::new();
        // Traverses into "level" which is a number in the first entry
        let (s1, mut rx1) = matcher.subscribe(
            "instruction",
            Operation::Insert,
            vec![Filter::new("level.value", FilterOp::Gt, 0i64)],
        );
        let (s2, mut rx2) = matcher.subscribe("instruction", Operation::Insert, vec![]);

        let bad = entry(1, Operation::Insert, json!({"level": 3}));
        let good = entry(2, Operation::Insert, json!({"level": {"value": 3}}));

        let report = matcher.dispatch(&bad);
        assert_eq!(report.faults.len(), 1);
        assert_eq!(report.faults[0].0, s1.id);
        assert_eq!(report.delivered, vec![s2.id]);

        let report = matcher.dispatch(&good);
        assert!(report.faults.is_empty());
        assert_eq!(report.delivered, vec![s1.id, s2.id]);

        assert_eq!(rx1.recv().await.unwrap().seq, 2);
        assert_eq!(rx2.recv().await.unwrap().seq, 1);
        assert_eq!(rx2.recv().await.unwrap().seq, 2);
    }

    #[tokio::test]
    async fn test_collection_must_match() {
        let matcher = Matcher::new();
        let (_h, mut rx) = matcher.subscribe("equiplet_commands", Operation::Insert, vec![]);
        matcher.dispatch(&entry(1, Operation::Insert, json!({})));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancelled_subscription_receives_nothing() {
        let matcher = Matcher::new();
        let (h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        assert_eq!(matcher.active_count(), 1);
        assert_eq!(matcher.state(&h), Some(SubscriptionState::Active));

        assert!(matcher.cancel(&h));
        assert!(!matcher.cancel(&h));
        assert_eq!(matcher.state(&h), Some(SubscriptionState::Cancelled));
        assert_eq!(matcher.active_count(), 0);

        let report = matcher.dispatch(&entry(1, Operation::Insert, json!({})));
        assert!(report.delivered.is_empty());
        // The channel closes once the matcher lets go of its sender
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_discards_parked_entries() {
        let matcher = Matcher::with_capacity(1);
        let (h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        matcher.dispatch(&entry(1, Operation::Insert, json!({})));
        matcher.dispatch(&entry(2, Operation::Insert, json!({})));
        assert_eq!(matcher.parked_count(), 1);

        assert!(matcher.cancel(&h));
        assert_eq!(matcher.parked_count(), 0);
        assert_eq!(matcher.flush(), 0);

        assert_eq!(rx.recv().await.unwrap().seq, 1);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_unknown_handle_has_no_state() {
        let matcher = Matcher::new();
        let stranger = SubscriptionHandle {
            id: 42,
            collection: "instruction".to_string(),
        };
        assert_eq!(matcher.state(&stranger), None);
        assert!(!matcher.cancel(&stranger));
    }

    #[tokio::test]
    async fn test_dropped_receiver_cancels_subscription() {
        let matcher = Matcher::new();
        let (h, rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        drop(rx);

        let report = matcher.dispatch(&entry(1, Operation::Insert, json!({})));
        assert!(report.delivered.is_empty());
        assert_eq!(matcher.state(&h), Some(SubscriptionState::Cancelled));
        assert_eq!(matcher.active_count(), 0);
    }

    #[tokio::test]
    async fn test_stalled_subscriber_does_not_hold_up_others() {
        let matcher = Matcher::with_capacity(1);
        let (stalled, _stalled_rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        let (_live, mut live_rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);

        for seq in 1..=3 {
            matcher.dispatch(&entry(seq, Operation::Insert, json!({})));
            let got = tokio::time::timeout(std::time::Duration::from_millis(500), live_rx.recv())
                .await
                .expect("delivery blocked by a stalled subscriber")
                .unwrap();
            assert_eq!(got.seq, seq);
        }

        let report = matcher.dispatch(&entry(4, Operation::Insert, json!({})));
        assert_eq!(report.parked, vec![stalled.id]);
        assert_eq!(matcher.parked_count(), 3);
    }

    #[tokio::test]
    async fn test_parked_entries_arrive_in_order_after_flush() {
        let matcher = Matcher::with_capacity(1);
        let (_h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        for seq in 1..=3 {
            matcher.dispatch(&entry(seq, Operation::Insert, json!({})));
        }
        assert_eq!(matcher.parked_count(), 2);

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let got = rx.recv().await.unwrap();
            seen.push(got.seq);
            matcher.flush();
        }
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(matcher.flush(), 0);
    }

    #[test]
    fn test_backlog_over_limit_drops_oldest_parked_entry() {
        let matcher = Matcher::with_capacity(1).with_backlog_limit(2);
        let (h, mut rx) = matcher.subscribe("instruction", Operation::Insert, vec![]);
        for seq in 1..=3 {
            matcher.dispatch(&entry(seq, Operation::Insert, json!({})));
        }
        let report = matcher.dispatch(&entry(4, Operation::Insert, json!({})));
        assert_eq!(report.dropped, vec![(h.id, 2)]);

        let mut seen = Vec::new();
        while let Ok(got) = rx.try_recv() {
            seen.push(got.seq);
            matcher.flush();
        }
        assert_eq!(seen, vec![1, 3, 4]);
    }
}
