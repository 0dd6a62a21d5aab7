//! Hit/miss, latency and memory statistics.
//!
//! Counters are plain atomics updated on the request path; [`Stats`] is a
//! point-in-time snapshot assembled on demand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::entry::Tier;

#[derive(Debug, Default)]
struct TierCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    response_us: AtomicU64,
    responses: AtomicU64,
}

/// Live counters for one cache instance.
#[derive(Debug, Default)]
pub struct StatsCollector {
    tiers: [TierCounters; 3],
    invalidations: AtomicU64,
    evictions: AtomicU64,
    promotions: AtomicU64,
    demotions: AtomicU64,
    compressed_original_bytes: AtomicU64,
    compressed_stored_bytes: AtomicU64,
}

fn index(tier: Tier) -> usize {
    tier.level() as usize
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self, tier: Tier, elapsed: Duration) {
        let counters = &self.tiers[index(tier)];
        counters.hits.fetch_add(1, Ordering::Relaxed);
        Self::record_latency(counters, elapsed);
    }

    pub fn record_miss(&self, tier: Tier, elapsed: Duration) {
        let counters = &self.tiers[index(tier)];
        counters.misses.fetch_add(1, Ordering::Relaxed);
        Self::record_latency(counters, elapsed);
    }

    fn record_latency(counters: &TierCounters, elapsed: Duration) {
        counters
            .response_us
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
        counters.responses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalidations(&self, n: u64) {
        self.invalidations.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_promotion(&self) {
        self.promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_demotion(&self) {
        self.demotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compression(&self, original: usize, stored: usize) {
        self.compressed_original_bytes
            .fetch_add(original as u64, Ordering::Relaxed);
        self.compressed_stored_bytes
            .fetch_add(stored as u64, Ordering::Relaxed);
    }

    /// Assemble a snapshot. `usage` supplies (entry count, logical bytes) per tier.
    pub fn snapshot(&self, usage: impl Fn(Tier) -> (usize, usize)) -> Stats {
        let mut tiers = Vec::with_capacity(3);
        let mut hits = 0;
        let mut misses = 0;
        let mut total_us = 0;
        let mut responses = 0;
        let mut memory = 0;

        for tier in Tier::ALL {
            let counters = &self.tiers[index(tier)];
            let tier_hits = counters.hits.load(Ordering::Relaxed);
            let tier_misses = counters.misses.load(Ordering::Relaxed);
            let tier_us = counters.response_us.load(Ordering::Relaxed);
            let tier_responses = counters.responses.load(Ordering::Relaxed);
            let (size, bytes) = usage(tier);

            hits += tier_hits;
            misses += tier_misses;
            total_us += tier_us;
            responses += tier_responses;
            if tier != Tier::L3 {
                memory += bytes;
            }

            tiers.push(TierStats {
                tier,
                hits: tier_hits,
                misses: tier_misses,
                size,
                memory_bytes: bytes,
                avg_response_time_ms: average_ms(tier_us, tier_responses),
            });
        }

        let original = self.compressed_original_bytes.load(Ordering::Relaxed);
        let stored = self.compressed_stored_bytes.load(Ordering::Relaxed);

        Stats {
            tiers,
            overall: OverallStats {
                hits,
                misses,
                total_requests: hits + misses,
                hit_ratio: ratio(hits, hits + misses),
                avg_response_time_ms: average_ms(total_us, responses),
                compression_ratio: if stored == 0 {
                    1.0
                } else {
                    original as f64 / stored as f64
                },
                invalidations: self.invalidations.load(Ordering::Relaxed),
                evictions: self.evictions.load(Ordering::Relaxed),
                promotions: self.promotions.load(Ordering::Relaxed),
                demotions: self.demotions.load(Ordering::Relaxed),
                memory_usage_bytes: memory,
            },
        }
    }
}

fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    part as f64 / whole as f64
}

fn average_ms(total_us: u64, count: u64) -> f64 {
    if count == 0 {
        return 0.0;
    }
    total_us as f64 / count as f64 / 1000.0
}

/// Per-tier statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: Tier,
    pub hits: u64,
    pub misses: u64,
    /// Number of entries currently held.
    pub size: usize,
    pub memory_bytes: usize,
    pub avg_response_time_ms: f64,
}

/// Aggregate statistics across tiers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverallStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub hit_ratio: f64,
    pub avg_response_time_ms: f64,
    pub compression_ratio: f64,
    pub invalidations: u64,
    pub evictions: u64,
    pub promotions: u64,
    pub demotions: u64,
    /// Logical bytes held by the local tiers.
    pub memory_usage_bytes: usize,
}

/// A point-in-time statistics snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stats {
    pub tiers: Vec<TierStats>,
    pub overall: OverallStats,
}

impl Stats {
    pub fn tier(&self, tier: Tier) -> Option<&TierStats> {
        self.tiers.iter().find(|t| t.tier == tier)
    }
}
