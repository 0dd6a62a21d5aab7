//! Eviction policy: decides which entry leaves a full tier.
//!
//! Every strategy maps an entry to a priority where higher means "evict
//! first":
//! - `lru`: older last access → higher priority
//! - `ttl`: older creation → higher priority
//! - `adaptive`: weighted score of age, idle time, size and access count
//!
//! Ties are broken by the access sequence, oldest first.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::cache::entry::{now_millis, CacheEntry};
use crate::config::{EvictionConfig, EvictionStrategy};

/// An eviction candidate with its computed priority score.
#[derive(Debug, Clone)]
pub struct EvictionCandidate {
    pub key: String,
    pub score: f64,
    access_seq: u64,
}

// Higher score = higher eviction priority; on equal scores the older access wins.
impl PartialEq for EvictionCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EvictionCandidate {}

impl PartialOrd for EvictionCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EvictionCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.access_seq.cmp(&self.access_seq))
    }
}

/// The eviction policy engine.
#[derive(Debug, Clone)]
pub struct Evictor {
    config: EvictionConfig,
}

impl Evictor {
    pub fn new(config: EvictionConfig) -> Self {
        Self { config }
    }

    /// Compute eviction priority for a single entry.
    ///
    /// ```text
    /// adaptive(entry) =
    ///     0.3 × age_ms +
    ///     0.4 × idle_ms +
    ///     0.2 × size_bytes −
    ///     0.1 × access_count
    /// ```
    pub fn compute_priority<T>(&self, entry: &CacheEntry<T>, now: u64) -> f64 {
        match self.config.strategy {
            EvictionStrategy::Lru => -(entry.last_accessed_at as f64),
            EvictionStrategy::Ttl => -(entry.created_at as f64),
            EvictionStrategy::Adaptive => {
                self.config.age_weight * entry.age_ms(now) as f64
                    + self.config.idle_weight * entry.idle_ms(now) as f64
                    + self.config.size_weight * entry.size_bytes as f64
                    - self.config.access_weight * entry.access_count as f64
            }
        }
    }

    fn candidate<T>(&self, key: &str, entry: &CacheEntry<T>, now: u64) -> EvictionCandidate {
        EvictionCandidate {
            key: key.to_string(),
            score: self.compute_priority(entry, now),
            access_seq: entry.access_seq,
        }
    }

    /// Select the single entry to evict. Returns None for an empty tier.
    pub fn select_victim<'a, T: 'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CacheEntry<T>)>,
    ) -> Option<EvictionCandidate> {
        let now = now_millis();
        entries
            .map(|(key, entry)| self.candidate(key, entry, now))
            .max()
    }

    /// Select up to `count` entries to evict, highest priority first.
    pub fn select_victims<'a, T: 'a>(
        &self,
        entries: impl Iterator<Item = (&'a String, &'a CacheEntry<T>)>,
        count: usize,
    ) -> Vec<EvictionCandidate> {
        let now = now_millis();
        let mut heap: BinaryHeap<EvictionCandidate> = entries
            .map(|(key, entry)| self.candidate(key, entry, now))
            .collect();

        let mut victims = Vec::with_capacity(count.min(heap.len()));
        for _ in 0..count {
            if let Some(candidate) = heap.pop() {
                victims.push(candidate);
            } else {
                break;
            }
        }

        victims
    }
}
