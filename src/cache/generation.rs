//! Per-key write generations.
//!
//! A read that has to wait on a lower tier captures the key's generation
//! first and copies what it found upward only if the generation is still
//! the same. Writes and invalidations advance the generation while they
//! change the local tiers, so a slow read can never resurrect a value that
//! was replaced or invalidated in the meantime.
//!
//! Keys hash onto a fixed number of slots. Two keys sharing a slot can make
//! a read skip its promotion, which costs a later L2/L3 hit and nothing else.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use parking_lot::{Mutex, MutexGuard};

/// Must be a power of two.
const SLOTS: usize = 256;

pub struct KeyGenerations {
    slots: Box<[Mutex<u64>]>,
}

impl Default for KeyGenerations {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerations {
    pub fn new() -> Self {
        Self {
            slots: (0..SLOTS).map(|_| Mutex::new(0)).collect(),
        }
    }

    fn slot(&self, key: &str) -> &Mutex<u64> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        &self.slots[(hasher.finish() as usize) & (SLOTS - 1)]
    }

    pub fn current(&self, key: &str) -> u64 {
        *self.slot(key).lock()
    }

    /// Start a new generation for `key`. Local tier changes for the key
    /// happen while the returned guard is held.
    pub fn advance(&self, key: &str) -> MutexGuard<'_, u64> {
        let mut generation = self.slot(key).lock();
        *generation = generation.wrapping_add(1);
        generation
    }

    /// Lock the key's slot if its generation is still `seen`.
    pub fn unchanged_since(&self, key: &str, seen: u64) -> Option<MutexGuard<'_, u64>> {
        let generation = self.slot(key).lock();
        (*generation == seen).then_some(generation)
    }
}
