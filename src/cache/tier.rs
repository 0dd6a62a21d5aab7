//! Local (in-process) tier storage.
//!
//! Each tier owns its map behind a mutex that is held for exactly one
//! lookup, insert, delete or scan. Nothing here awaits, so the lock can
//! never be held across an I/O call.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::cache::entry::{CacheEntry, Tier};
use crate::cache::evictor::Evictor;

/// Result of looking up a key in one tier.
#[derive(Debug)]
pub enum Lookup<T> {
    /// Live entry; the returned copy already reflects this access.
    Hit(CacheEntry<T>),
    /// The entry had expired and was deleted on read.
    Expired,
    Miss,
}

pub struct LocalTier<T> {
    tier: Tier,
    max_entries: usize,
    ttl_ms: u64,
    entries: Mutex<HashMap<String, CacheEntry<T>>>,
}

impl<T: Clone> LocalTier<T> {
    pub fn new(tier: Tier, max_entries: usize, ttl_ms: u64) -> Self {
        Self {
            tier,
            max_entries,
            ttl_ms,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    /// Default TTL for entries written to this tier.
    pub fn ttl_ms(&self) -> u64 {
        self.ttl_ms
    }

    /// Look up a key, recording the access and current hotness on a hit.
    pub fn lookup(&self, key: &str, now: u64, hotness: f64) -> Lookup<T> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            return Lookup::Miss;
        };
        if !entry.is_expired(now) {
            entry.touch();
            entry.hotness = hotness;
            return Lookup::Hit(entry.clone());
        }
        entries.remove(key);
        Lookup::Expired
    }

    /// Read an entry without counting it as an access.
    pub fn peek(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.lock().get(key).cloned()
    }

    /// Insert an entry, evicting one victim first if the tier is full.
    /// Returns the evicted key. Overwriting an existing key never evicts.
    pub fn insert(&self, key: &str, mut entry: CacheEntry<T>, evictor: &Evictor) -> Option<String> {
        entry.tier = self.tier;
        let mut entries = self.entries.lock();

        let mut evicted = None;
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            if let Some(victim) = evictor.select_victim(entries.iter()) {
                entries.remove(&victim.key);
                evicted = Some(victim.key);
            }
        }

        entries.insert(key.to_string(), entry);
        evicted
    }

    /// Insert only if the key exists or there is a free slot. Never evicts.
    pub fn insert_if_space(&self, key: &str, mut entry: CacheEntry<T>) -> bool {
        entry.tier = self.tier;
        let mut entries = self.entries.lock();
        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            return false;
        }
        entries.insert(key.to_string(), entry);
        true
    }

    /// Replace an entry only if it was not touched or rewritten since `seq`.
    pub fn replace_if_unchanged(&self, key: &str, seq: u64, entry: CacheEntry<T>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get_mut(key) {
            Some(current) if current.access_seq == seq => {
                *current = entry;
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry<T>> {
        self.entries.lock().remove(key)
    }

    /// Mark an entry expired in place. Returns whether it existed.
    pub fn expire(&self, key: &str) -> bool {
        match self.entries.lock().get_mut(key) {
            Some(entry) => {
                entry.expire();
                true
            }
            None => false,
        }
    }

    /// Apply `f` to every entry in one pass.
    pub fn for_each_mut(&self, mut f: impl FnMut(&str, &mut CacheEntry<T>)) {
        for (key, entry) in self.entries.lock().iter_mut() {
            f(key, entry);
        }
    }

    /// Remove every expired entry. Returns the removed keys and their sizes.
    pub fn remove_expired(&self, now: u64) -> Vec<(String, usize)> {
        let mut removed = Vec::new();
        self.entries.lock().retain(|key, entry| {
            if entry.is_expired(now) {
                removed.push((key.clone(), entry.size_bytes));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Entries for which `pred` holds, cloned.
    pub fn collect_where(
        &self,
        mut pred: impl FnMut(&str, &CacheEntry<T>) -> bool,
    ) -> Vec<(String, CacheEntry<T>)> {
        self.entries
            .lock()
            .iter()
            .filter(|(key, entry)| pred(key, entry))
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect()
    }

    /// Choose up to `count` victims with the given policy.
    pub fn victims(&self, evictor: &Evictor, count: usize) -> Vec<String> {
        let entries = self.entries.lock();
        evictor
            .select_victims(entries.iter(), count)
            .into_iter()
            .map(|candidate| candidate.key)
            .collect()
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries.lock().keys().cloned().collect()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn free_slots(&self) -> usize {
        self.max_entries.saturating_sub(self.len())
    }

    /// Sum of logical entry sizes.
    pub fn memory_bytes(&self) -> usize {
        self.entries.lock().values().map(|e| e.size_bytes).sum()
    }

    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::entry::{now_millis, Payload};
    use crate::config::{EvictionConfig, EvictionStrategy};

    fn lru() -> Evictor {
        Evictor::new(EvictionConfig {
            strategy: EvictionStrategy::Lru,
            ..Default::default()
        })
    }

    fn entry(v: u32) -> CacheEntry<u32> {
        CacheEntry::new(v, 4, 60_000, Tier::L1)
    }

    #[test]
    fn test_single_eviction_when_full() {
        let tier = LocalTier::new(Tier::L1, 2, 60_000);
        assert_eq!(tier.insert("a", entry(1), &lru()), None);
        assert_eq!(tier.insert("b", entry(2), &lru()), None);
        assert_eq!(tier.insert("c", entry(3), &lru()), Some("a".to_string()));
        assert_eq!(tier.len(), 2);
    }

    #[test]
    fn test_overwrite_never_evicts() {
        let tier = LocalTier::new(Tier::L1, 2, 60_000);
        tier.insert("a", entry(1), &lru());
        tier.insert("b", entry(2), &lru());
        assert_eq!(tier.insert("a", entry(9), &lru()), None);
        assert_eq!(tier.len(), 2);
        assert!(matches!(tier.peek("a").unwrap().payload, Payload::Value(9)));
    }

    #[test]
    fn test_expired_deleted_on_read() {
        let tier = LocalTier::new(Tier::L1, 4, 60_000);
        let mut e = entry(1);
        e.ttl_ms = 0;
        tier.insert("a", e, &lru());

        assert!(matches!(tier.lookup("a", now_millis(), 0.5), Lookup::Expired));
        assert!(!tier.contains("a"));
        assert!(matches!(tier.lookup("a", now_millis(), 0.5), Lookup::Miss));
    }

    #[test]
    fn test_insert_if_space() {
        let tier = LocalTier::new(Tier::L1, 1, 60_000);
        assert!(tier.insert_if_space("a", entry(1)));
        assert!(!tier.insert_if_space("b", entry(2)));
        assert!(tier.insert_if_space("a", entry(3)));
    }

    #[test]
    fn test_replace_if_unchanged() {
        let tier = LocalTier::new(Tier::L2, 4, 60_000);
        tier.insert("a", entry(1), &lru());
        let seq = tier.peek("a").unwrap().access_seq;

        // A read in between invalidates the stale copy.
        tier.lookup("a", now_millis(), 0.5);
        assert!(!tier.replace_if_unchanged("a", seq, entry(2)));

        let seq = tier.peek("a").unwrap().access_seq;
        assert!(tier.replace_if_unchanged("a", seq, entry(2)));
    }
}
