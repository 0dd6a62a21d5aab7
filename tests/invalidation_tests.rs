//! Integration tests for pattern and rule-based invalidation.

use tier_cache::cache::invalidation::{InvalidationRule, InvalidationStrategy};
use tier_cache::cache::store::{InvalidateOptions, SetOptions, TieredCache};
use tier_cache::config::CacheConfig;
use tier_cache::Tier;

async fn seeded(keys: &[&str]) -> TieredCache<String> {
    let cache = TieredCache::new(CacheConfig::default()).unwrap();
    for key in keys {
        cache.set(key, format!("value of {key}"), SetOptions::default()).await;
    }
    cache
}

#[tokio::test]
async fn test_immediate_rule_removes_dependents() {
    let cache = seeded(&["balance:1", "account:1", "account:2", "ledger:1"]).await;
    cache.add_invalidation_rule(
        InvalidationRule::new("^balance:.*", &["account:.*"], InvalidationStrategy::Immediate, 0).unwrap(),
    );

    let removed = cache.invalidate("balance:1", InvalidateOptions::default()).await;

    assert_eq!(removed, 3);
    assert_eq!(cache.get("balance:1").await, None);
    assert_eq!(cache.get("account:1").await, None);
    assert_eq!(cache.get("account:2").await, None);
    assert!(cache.get("ledger:1").await.is_some());
    assert_eq!(cache.get_stats().overall.invalidations, 3);
}

#[tokio::test]
async fn test_cascading_removes_across_tiers() {
    let cache = seeded(&["user:1", "other"]).await;
    cache
        .set("session:1", "s".to_string(), SetOptions::default().tier(Tier::L2))
        .await;
    cache.set("profile:1", "p".to_string(), SetOptions::default()).await;
    cache.add_invalidation_rule(
        InvalidationRule::new(
            "^user:",
            &["^session:", "^profile:"],
            InvalidationStrategy::Cascading,
            0,
        )
        .unwrap(),
    );

    let removed = cache
        .invalidate("user:1", InvalidateOptions::strategy(InvalidationStrategy::Cascading))
        .await;

    assert_eq!(removed, 3);
    assert!(!cache.contains_in(Tier::L2, "session:1"));
    assert_eq!(cache.get("profile:1").await, None);
    assert!(cache.get("other").await.is_some());
}

#[tokio::test]
async fn test_expansion_is_one_level() {
    let cache = seeded(&["a:1", "b:1", "c:1"]).await;
    for (pattern, deps) in [("^a:", "^b:"), ("^b:", "^c:")] {
        cache.add_invalidation_rule(
            InvalidationRule::new(pattern, &[deps], InvalidationStrategy::Immediate, 0).unwrap(),
        );
    }

    let removed = cache
        .invalidate("^a:", InvalidateOptions::strategy(InvalidationStrategy::Cascading))
        .await;

    assert_eq!(removed, 2);
    assert!(cache.get("c:1").await.is_some());
}

#[tokio::test]
async fn test_lazy_marks_then_deletes_on_read() {
    let cache = seeded(&["temp:1", "temp:2", "keep"]).await;

    let marked = cache
        .invalidate("^temp:", InvalidateOptions::strategy(InvalidationStrategy::Lazy))
        .await;
    assert_eq!(marked, 2);

    // Still resident until read.
    assert!(cache.contains_in(Tier::L1, "temp:1"));
    assert_eq!(cache.get("temp:1").await, None);
    assert!(!cache.contains_in(Tier::L1, "temp:1"));

    // The sweep reclaims the rest.
    assert_eq!(cache.sweep_expired().await, 1);
    assert!(cache.get("keep").await.is_some());
}

#[tokio::test]
async fn test_lazy_rule_expires_dependents() {
    let cache = seeded(&["order:1", "invoice:1"]).await;
    cache.add_invalidation_rule(
        InvalidationRule::new("^order:", &["^invoice:"], InvalidationStrategy::Lazy, 0).unwrap(),
    );

    let affected = cache.invalidate("order:1", InvalidateOptions::default()).await;

    assert_eq!(affected, 2);
    assert!(!cache.contains_in(Tier::L1, "order:1"));
    // Marked, not deleted.
    assert!(cache.contains_in(Tier::L1, "invoice:1"));
    assert_eq!(cache.get("invoice:1").await, None);
}

#[tokio::test]
async fn test_invalid_regex_matches_literally() {
    let cache = seeded(&["calc(1)", "calc2"]).await;

    let removed = cache.invalidate("calc(", InvalidateOptions::default()).await;

    assert_eq!(removed, 1);
    assert!(cache.get("calc2").await.is_some());
}

#[tokio::test]
async fn test_unanchored_pattern_matches_substrings() {
    let cache = seeded(&["balance:1", "balance:10", "balance:2"]).await;
    assert_eq!(cache.invalidate("balance:1", InvalidateOptions::default()).await, 2);
    assert!(cache.get("balance:2").await.is_some());

    let cache = seeded(&["balance:1", "balance:10"]).await;
    assert_eq!(cache.invalidate("^balance:1$", InvalidateOptions::default()).await, 1);
    assert!(cache.get("balance:10").await.is_some());
}

#[tokio::test]
async fn test_no_match_is_noop() {
    let cache = seeded(&["a"]).await;
    assert_eq!(cache.invalidate("^zzz", InvalidateOptions::default()).await, 0);
    assert_eq!(cache.get_stats().overall.invalidations, 0);
}

#[tokio::test]
async fn test_small_batches_delete_everything() {
    let keys: Vec<String> = (0..25).map(|i| format!("bulk:{i}")).collect();
    let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let cache = seeded(&refs).await;

    let options = InvalidateOptions {
        strategy: InvalidationStrategy::Immediate,
        batch_size: Some(4),
    };
    assert_eq!(cache.invalidate("^bulk:", options).await, 25);
    assert_eq!(cache.get("bulk:24").await, None);
}
