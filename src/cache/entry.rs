//! Cache entry types and tier definitions.
//!
//! An entry is the unit of movement between tiers: it is promoted, demoted,
//! compressed and evicted as a whole.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Identifies which tier an entry currently resides in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Tier {
    /// Tier 1: small in-process map (hot).
    L1,
    /// Tier 2: larger in-process map (warm).
    L2,
    /// Tier 3: optional remote store (cold).
    L3,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::L1, Tier::L2, Tier::L3];

    /// Returns the numeric tier level (lower = faster).
    pub fn level(&self) -> u8 {
        match self {
            Tier::L1 => 0,
            Tier::L2 => 1,
            Tier::L3 => 2,
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tier::L1 => write!(f, "L1"),
            Tier::L2 => write!(f, "L2"),
            Tier::L3 => write!(f, "L3"),
        }
    }
}

/// Milliseconds since the UNIX epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Global monotonic access sequence. Orders accesses within the same millisecond.
static NEXT_ACCESS_SEQ: AtomicU64 = AtomicU64::new(0);

fn next_access_seq() -> u64 {
    NEXT_ACCESS_SEQ.fetch_add(1, Ordering::Relaxed)
}

/// Stored form of a value: decoded, or compressed bytes. Never both.
#[derive(Debug, Clone)]
pub enum Payload<T> {
    Value(T),
    Compressed(Vec<u8>),
}

/// A single cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// Value or its compressed encoding.
    pub payload: Payload<T>,

    /// Creation time (ms since epoch).
    pub created_at: u64,

    /// Time-to-live from `created_at`. Zero means already expired.
    pub ttl_ms: u64,

    /// Number of hits served by this entry.
    pub access_count: u64,

    /// Time of last access (ms since epoch).
    pub last_accessed_at: u64,

    /// Uncompressed logical size, used for capacity and memory accounting.
    pub size_bytes: usize,

    /// Current tier.
    pub tier: Tier,

    /// Coarse access signal in 0.0..=1.0.
    pub hotness: f64,

    /// Keys this entry depends on.
    pub dependency_keys: HashSet<String>,

    /// `size_bytes / compressed_len` once compressed.
    pub compression_ratio: Option<f64>,

    pub(crate) access_seq: u64,
}

impl<T> CacheEntry<T> {
    /// Create a fresh, uncompressed entry.
    pub fn new(value: T, size_bytes: usize, ttl_ms: u64, tier: Tier) -> Self {
        let now = now_millis();
        Self {
            payload: Payload::Value(value),
            created_at: now,
            ttl_ms,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
            tier,
            hotness: 0.5,
            dependency_keys: HashSet::new(),
            compression_ratio: None,
            access_seq: next_access_seq(),
        }
    }

    /// Create an entry that arrives already compressed (e.g. from a remote tier).
    pub fn new_compressed(bytes: Vec<u8>, size_bytes: usize, ttl_ms: u64, tier: Tier) -> Self {
        let now = now_millis();
        Self {
            compression_ratio: Some(compression_ratio(size_bytes, bytes.len())),
            payload: Payload::Compressed(bytes),
            created_at: now,
            ttl_ms,
            access_count: 0,
            last_accessed_at: now,
            size_bytes,
            tier,
            hotness: 0.5,
            dependency_keys: HashSet::new(),
            access_seq: next_access_seq(),
        }
    }

    /// Whether the entry's lifetime has run out at `now`.
    pub fn is_expired(&self, now: u64) -> bool {
        now.saturating_sub(self.created_at) >= self.ttl_ms
    }

    /// Record an access, updating timestamp and counter.
    pub fn touch(&mut self) {
        self.last_accessed_at = now_millis();
        self.access_count += 1;
        self.access_seq = next_access_seq();
    }

    /// Mark the entry expired without removing it.
    pub fn expire(&mut self) {
        self.ttl_ms = 0;
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.payload, Payload::Compressed(_))
    }

    /// Replace the value with its compressed form.
    pub fn set_compressed(&mut self, bytes: Vec<u8>) {
        self.compression_ratio = Some(compression_ratio(self.size_bytes, bytes.len()));
        self.payload = Payload::Compressed(bytes);
    }

    /// Age since creation in ms.
    pub fn age_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.created_at)
    }

    /// Time since last access in ms.
    pub fn idle_ms(&self, now: u64) -> u64 {
        now.saturating_sub(self.last_accessed_at)
    }

    /// Copy this entry into `tier` with a new lifetime, keeping access history.
    pub fn copy_to(&self, tier: Tier, ttl_ms: u64) -> Self
    where
        T: Clone,
    {
        let mut copy = self.clone();
        copy.tier = tier;
        copy.created_at = now_millis();
        copy.ttl_ms = ttl_ms;
        copy
    }

    /// Recompute hotness from the hot set and idle time.
    ///
    /// Hot keys score 1.0. Everything else starts at `baseline` and decays
    /// linearly to 0.0 over `cold_after_ms` of idleness.
    pub fn refresh_hotness(&mut self, is_hot: bool, baseline: f64, now: u64, cold_after_ms: u64) {
        self.hotness = if is_hot {
            1.0
        } else if cold_after_ms == 0 {
            baseline
        } else {
            let idle = self.idle_ms(now) as f64 / cold_after_ms as f64;
            baseline * (1.0 - idle).clamp(0.0, 1.0)
        };
    }
}

/// Ratio of logical to stored size. Never reported below 1.0 for empty output.
pub fn compression_ratio(original: usize, compressed: usize) -> f64 {
    if compressed == 0 {
        return 1.0;
    }
    original as f64 / compressed as f64
}
