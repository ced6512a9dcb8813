//! Subscriber registry for live updates
//!
//! Each subscriber owns a bounded FIFO. Broadcasting never waits on a
//! consumer: a full queue loses its oldest message, and a queue that still
//! cannot take the message gets its subscriber removed.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Result of offering one message to one subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Offer {
    Queued,
    DroppedOldest,
    Rejected,
}

/// A single live listener
#[derive(Debug)]
pub struct Subscriber {
    id: u64,
    capacity: usize,
    queue: Mutex<VecDeque<Arc<str>>>,
    notify: Notify,
}

impl Subscriber {
    fn new(id: u64, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            queue: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            notify: Notify::new(),
        }
    }

    fn offer(&self, message: &Arc<str>) -> Offer {
        let mut queue = self.queue.lock();

        let mut dropped = false;
        if queue.len() >= self.capacity {
            dropped = queue.pop_front().is_some();
        }
        if queue.len() >= self.capacity {
            return Offer::Rejected;
        }

        queue.push_back(Arc::clone(message));
        drop(queue);
        self.notify.notify_one();

        if dropped {
            Offer::DroppedOldest
        } else {
            Offer::Queued
        }
    }

    fn pop(&self) -> Option<Arc<str>> {
        self.queue.lock().pop_front()
    }
}

/// Per-broadcast counters
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    pub delivered: usize,
    pub dropped_oldest: usize,
    pub removed: usize,
}

/// Owned set of live subscribers, guarded by a single lock
#[derive(Debug)]
pub struct SubscriberRegistry {
    subscribers: Mutex<HashMap<u64, Arc<Subscriber>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl SubscriberRegistry {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            queue_capacity,
        }
    }

    /// Register a new subscriber; it is removed again when the guard drops
    pub fn subscribe(self: &Arc<Self>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let subscriber = Arc::new(Subscriber::new(id, self.queue_capacity));
        self.subscribers.lock().insert(id, Arc::clone(&subscriber));
        debug!(subscriber = id, "Subscriber connected");

        Subscription {
            registry: Arc::clone(self),
            subscriber,
        }
    }

    /// Remove a subscriber, returning whether it was still registered
    pub fn remove(&self, id: u64) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    /// Number of live subscribers
    pub fn len(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Queue `message` for every subscriber without blocking on any of them
    pub fn broadcast(&self, message: &str) -> BroadcastStats {
        let message: Arc<str> = Arc::from(message);
        let mut stats = BroadcastStats::default();

        let mut subscribers = self.subscribers.lock();
        let mut dead = Vec::new();

        for (id, subscriber) in subscribers.iter() {
            match subscriber.offer(&message) {
                Offer::Queued => stats.delivered += 1,
                Offer::DroppedOldest => {
                    stats.delivered += 1;
                    stats.dropped_oldest += 1;
                }
                Offer::Rejected => dead.push(*id),
            }
        }

        for id in dead {
            subscribers.remove(&id);
            stats.removed += 1;
            warn!(subscriber = id, "Removed subscriber with unusable queue");
        }

        if stats.dropped_oldest > 0 {
            debug!(dropped = stats.dropped_oldest, "Slow subscribers lost their oldest message");
        }

        stats
    }
}

/// A live subscription; dropping it unregisters the subscriber
#[derive(Debug)]
pub struct Subscription {
    registry: Arc<SubscriberRegistry>,
    subscriber: Arc<Subscriber>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.subscriber.id
    }

    /// Next queued message, or `None` if nothing arrived within `wait`
    pub async fn next_message(&self, wait: Duration) -> Option<Arc<str>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(message) = self.subscriber.pop() {
                return Some(message);
            }
            if timeout_at(deadline, self.subscriber.notify.notified()).await.is_err() {
                return self.subscriber.pop();
            }
        }
    }

    /// Take a queued message without waiting
    #[cfg(test)]
    pub fn try_next(&self) -> Option<Arc<str>> {
        self.subscriber.pop()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.registry.remove(self.subscriber.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sub: &Subscription) -> Vec<String> {
        std::iter::from_fn(|| sub.try_next()).map(|m| m.to_string()).collect()
    }

    #[test]
    fn test_fifo_delivery_to_every_subscriber() {
        let registry = Arc::new(SubscriberRegistry::new(8));
        let a = registry.subscribe();
        let b = registry.subscribe();
        assert_eq!(registry.len(), 2);

        for i in 0..3 {
            let stats = registry.broadcast(&format!("m{i}"));
            assert_eq!(stats.delivered, 2);
        }

        assert_eq!(drain(&a), vec!["m0", "m1", "m2"]);
        assert_eq!(drain(&b), vec!["m0", "m1", "m2"]);
    }

    #[test]
    fn test_full_queue_drops_oldest() {
        let registry = Arc::new(SubscriberRegistry::new(2));
        let sub = registry.subscribe();

        registry.broadcast("m0");
        registry.broadcast("m1");
        let stats = registry.broadcast("m2");

        assert_eq!(stats.dropped_oldest, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(drain(&sub), vec!["m1", "m2"]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_never_reading_subscriber_does_not_block() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let stalled = registry.subscribe();
        let reader = registry.subscribe();

        let started = std::time::Instant::now();
        for i in 0..10_000 {
            registry.broadcast(&format!("m{i}"));
        }
        assert!(started.elapsed() < Duration::from_secs(5));

        // the stalled subscriber holds only the newest messages
        assert_eq!(drain(&stalled), vec!["m9996", "m9997", "m9998", "m9999"]);
        assert_eq!(drain(&reader).len(), 4);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unusable_queue_is_removed() {
        let registry = Arc::new(SubscriberRegistry::new(0));
        let sub = registry.subscribe();

        let stats = registry.broadcast("m0");
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.delivered, 0);
        assert!(registry.is_empty());

        // dropping the guard after removal is fine
        drop(sub);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_drop_unsubscribes() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let sub = registry.subscribe();
        let id = sub.id();
        drop(sub);

        assert!(registry.is_empty());
        assert!(!registry.remove(id));
        assert_eq!(registry.broadcast("nobody").delivered, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_next_message_times_out_then_wakes() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let sub = registry.subscribe();

        assert_eq!(sub.next_message(Duration::from_secs(15)).await, None);

        let sender = Arc::clone(&registry);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            sender.broadcast("hello");
        });

        let got = sub.next_message(Duration::from_secs(15)).await;
        assert_eq!(got.as_deref(), Some("hello"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_wakeup_does_not_end_wait_early() {
        let registry = Arc::new(SubscriberRegistry::new(4));
        let sub = registry.subscribe();

        // leaves a notify permit behind after the message is taken
        registry.broadcast("m0");
        assert_eq!(sub.try_next().as_deref(), Some("m0"));

        let started = Instant::now();
        assert_eq!(sub.next_message(Duration::from_secs(15)).await, None);
        assert!(started.elapsed() >= Duration::from_secs(15));
    }
}
