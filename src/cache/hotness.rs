//! Hot-key tracking.
//!
//! A bounded set of recently hit keys. It is a coarse placement signal,
//! not a frequency counter: a key is either hot or it is not.

use std::collections::HashMap;

/// Hotness reported for keys in the hot set.
pub const HOT: f64 = 1.0;

/// Hotness reported for every other key.
pub const BASELINE: f64 = 0.5;

pub struct HotnessTracker {
    /// Key → insertion stamp. Larger stamps are more recent.
    keys: HashMap<String, u64>,
    next_stamp: u64,
    capacity: usize,
}

impl HotnessTracker {
    pub fn new(capacity: usize) -> Self {
        Self {
            keys: HashMap::new(),
            next_stamp: 0,
            capacity: capacity.max(1),
        }
    }

    /// Mark `key` hot. Re-recording a key refreshes its position.
    ///
    /// When the set grows past its capacity, only the most recently added
    /// half is kept.
    pub fn record(&mut self, key: &str) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        match self.keys.get_mut(key) {
            Some(existing) => *existing = stamp,
            None => {
                self.keys.insert(key.to_string(), stamp);
            }
        }

        if self.keys.len() > self.capacity {
            self.shrink();
        }
    }

    fn shrink(&mut self) {
        let keep = (self.capacity / 2).max(1);
        let mut stamps: Vec<u64> = self.keys.values().copied().collect();
        stamps.sort_unstable_by(|a, b| b.cmp(a));
        let cutoff = stamps[keep - 1];
        self.keys.retain(|_, stamp| *stamp >= cutoff);
        tracing::debug!(retained = self.keys.len(), "Hot set trimmed");
    }

    pub fn is_hot(&self, key: &str) -> bool {
        self.keys.contains_key(key)
    }

    pub fn hotness(&self, key: &str) -> f64 {
        if self.is_hot(key) {
            HOT
        } else {
            BASELINE
        }
    }

    /// Drop a key from the hot set (the cached entry is unaffected).
    pub fn forget(&mut self, key: &str) {
        self.keys.remove(key);
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}
