//! Prefetching: keys the caller expects to read soon are promoted to L1
//! ahead of time.
//!
//! Requests are deduplicated into a FIFO queue. A background worker drains
//! it opportunistically; prefetching is best effort and never reports
//! failures to the caller.

use std::collections::{HashSet, VecDeque};

use parking_lot::Mutex;
use tokio::sync::Notify;

#[derive(Default)]
struct Queue {
    order: VecDeque<String>,
    pending: HashSet<String>,
}

/// Deduplicated prefetch queue.
#[derive(Default)]
pub struct PrefetchQueue {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl PrefetchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue keys not already pending. Returns how many were added.
    pub fn push<I, S>(&self, keys: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut added = 0;
        {
            let mut queue = self.queue.lock();
            for key in keys {
                let key = key.into();
                if queue.pending.insert(key.clone()) {
                    queue.order.push_back(key);
                    added += 1;
                }
            }
        }
        if added > 0 {
            self.notify.notify_one();
        }
        added
    }

    /// Take up to `max` keys from the front of the queue.
    pub fn drain(&self, max: usize) -> Vec<String> {
        let mut queue = self.queue.lock();
        let n = max.min(queue.order.len());
        let keys: Vec<String> = queue.order.drain(..n).collect();
        for key in &keys {
            queue.pending.remove(key);
        }
        keys
    }

    /// Wait until keys are pushed.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn len(&self) -> usize {
        self.queue.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.lock().order.is_empty()
    }

    pub fn clear(&self) {
        let mut queue = self.queue.lock();
        queue.order.clear();
        queue.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_deduplicates() {
        let queue = PrefetchQueue::new();
        assert_eq!(queue.push(["a", "b", "a"]), 2);
        assert_eq!(queue.push(["b", "c"]), 1);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_drain_in_order() {
        let queue = PrefetchQueue::new();
        queue.push(["a", "b", "c"]);

        assert_eq!(queue.drain(2), vec!["a", "b"]);
        // Drained keys may be queued again.
        assert_eq!(queue.push(["a"]), 1);
        assert_eq!(queue.drain(10), vec!["c", "a"]);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_notified_after_push() {
        let queue = std::sync::Arc::new(PrefetchQueue::new());
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.notified().await })
        };
        queue.push(["k"]);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
