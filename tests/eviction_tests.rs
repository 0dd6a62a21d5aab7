//! Integration tests for the eviction policy.

use std::time::Duration;

use tier_cache::cache::store::{SetOptions, TieredCache};
use tier_cache::config::{CacheConfig, EvictionStrategy, TierConfig};
use tier_cache::Tier;

fn cache(max_entries: usize, strategy: EvictionStrategy) -> TieredCache<String> {
    let mut config = CacheConfig {
        l1: TierConfig {
            max_entries,
            ttl_ms: 60_000,
        },
        ..Default::default()
    };
    config.eviction.strategy = strategy;
    TieredCache::new(config).unwrap()
}

#[tokio::test]
async fn test_adaptive_never_evicts_most_recent() {
    let capacity = 4;
    let cache = cache(capacity, EvictionStrategy::Adaptive);

    for i in 0..=capacity {
        cache
            .set(&format!("k{i}"), format!("v{i}"), SetOptions::default())
            .await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let resident: Vec<usize> = (0..=capacity)
        .filter(|i| cache.contains_in(Tier::L1, &format!("k{i}")))
        .collect();
    assert_eq!(resident.len(), capacity);
    // Oldest and idlest goes first; the newest stays.
    assert!(!resident.contains(&0));
    assert!(resident.contains(&(capacity - 1)));
    assert!(resident.contains(&capacity));
}

#[tokio::test]
async fn test_adaptive_prefers_idle_over_recently_read() {
    let cache = cache(3, EvictionStrategy::Adaptive);
    for key in ["a", "b", "c"] {
        cache.set(key, "v".to_string(), SetOptions::default()).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    // `a` is oldest but was just read; `b` is idle the longest.
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.get("a").await;
    cache.set("d", "v".to_string(), SetOptions::default()).await;

    assert!(cache.contains_in(Tier::L1, "a"));
    assert!(!cache.contains_in(Tier::L1, "b"));
}

#[tokio::test]
async fn test_ttl_strategy_evicts_oldest_created() {
    let cache = cache(2, EvictionStrategy::Ttl);
    cache.set("first", "1".to_string(), SetOptions::default()).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    cache.set("second", "2".to_string(), SetOptions::default()).await;
    // Reading does not protect an entry under the ttl strategy.
    cache.get("first").await;
    cache.set("third", "3".to_string(), SetOptions::default()).await;

    assert!(!cache.contains_in(Tier::L1, "first"));
    assert!(cache.contains_in(Tier::L1, "second"));
}

#[tokio::test]
async fn test_eviction_is_per_tier() {
    let cache = cache(1, EvictionStrategy::Lru);
    cache.set("l2", "x".to_string(), SetOptions::default().tier(Tier::L2)).await;
    cache.set("a", "1".to_string(), SetOptions::default()).await;
    cache.set("b", "2".to_string(), SetOptions::default()).await;

    // The L1 insert evicted from L1 only.
    assert!(cache.contains_in(Tier::L2, "l2"));
    assert!(!cache.contains_in(Tier::L1, "a"));
    assert!(cache.contains_in(Tier::L1, "b"));
}

#[tokio::test]
async fn test_memory_ceiling_enforced_by_sweep() {
    let config = CacheConfig {
        max_memory_bytes: 100,
        ..Default::default()
    };
    let cache = TieredCache::<String>::new(config).unwrap();
    for i in 0..10 {
        // 20 bytes of JSON each.
        cache
            .set(&format!("k{i}"), format!("{:018}", i), SetOptions::default())
            .await;
    }
    assert_eq!(cache.get_stats().overall.memory_usage_bytes, 200);

    let removed = cache.sweep_expired().await;
    assert_eq!(removed, 5);
    assert!(cache.get_stats().overall.memory_usage_bytes <= 100);
}
