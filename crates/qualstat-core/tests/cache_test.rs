use qualstat_core::cache::project_key;
use qualstat_core::{AggregateResult, ProjectStatsCache, TtlCache};
use std::sync::Arc;
use std::time::Duration;

fn result_with(total_items: i64) -> AggregateResult {
    AggregateResult {
        total_items,
        ..AggregateResult::empty()
    }
}

#[tokio::test]
async fn test_set_then_get_returns_value() {
    let cache: ProjectStatsCache = TtlCache::new(Duration::from_secs(300));
    cache.set(project_key(1), result_with(12)).await;

    let cached = cache.get(&project_key(1)).await.unwrap();
    assert_eq!(cached.total_items, 12);
}

#[tokio::test]
async fn test_invalidated_key_is_absent() {
    let cache: ProjectStatsCache = TtlCache::new(Duration::from_secs(300));
    cache.set(project_key(1), result_with(12)).await;

    assert!(cache.invalidate(&project_key(1)).await);
    assert!(cache.get(&project_key(1)).await.is_none());
}

#[tokio::test]
async fn test_hit_rate_counts_hits_and_misses() {
    let cache = TtlCache::new(Duration::from_secs(300));
    cache.set("present", 1u8).await;

    for _ in 0..3 {
        assert!(cache.get("present").await.is_some());
    }
    assert!(cache.get("absent").await.is_none());

    let stats = cache.stats().await;
    assert_eq!(stats.total_hits, 3);
    assert_eq!(stats.total_misses, 1);
    assert!((stats.hit_rate - 0.75).abs() < 1e-9);
    assert_eq!(stats.entries[0].hit_count, 3);
    assert!(stats.entries[0].last_access.is_some());
}

#[tokio::test]
async fn test_hit_rate_is_zero_without_requests() {
    let cache: TtlCache<u8> = TtlCache::new(Duration::from_secs(300));
    assert_eq!(cache.stats().await.hit_rate, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_never_returned() {
    let cache = TtlCache::new(Duration::from_millis(100));
    cache.set(project_key(3), 7u32).await;

    tokio::time::advance(Duration::from_millis(50)).await;
    assert_eq!(cache.get(&project_key(3)).await, Some(7));

    tokio::time::advance(Duration::from_millis(100)).await;
    assert_eq!(cache.get(&project_key(3)).await, None);
    assert!(cache.is_empty().await);

    let stats = cache.stats().await;
    assert_eq!(stats.total_hits, 1);
    assert_eq!(stats.total_misses, 1);
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_expired_counts_removed_entries() {
    let cache = TtlCache::new(Duration::from_secs(10));
    cache.set("a", 1u32).await;
    cache.set("b", 2u32).await;
    tokio::time::advance(Duration::from_secs(11)).await;
    cache.set("c", 3u32).await;

    assert_eq!(cache.cleanup_expired().await, 2);
    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.cleanup_expired().await, 0);
}

#[tokio::test(start_paused = true)]
async fn test_set_refreshes_expiry() {
    let cache = TtlCache::new(Duration::from_secs(10));
    cache.set("k", 1u32).await;
    tokio::time::advance(Duration::from_secs(8)).await;
    cache.set("k", 2u32).await;
    tokio::time::advance(Duration::from_secs(8)).await;

    assert_eq!(cache.get("k").await, Some(2));
}

#[tokio::test]
async fn test_concurrent_readers_and_writers() {
    let cache = Arc::new(TtlCache::new(Duration::from_secs(300)));
    let mut handles = Vec::new();

    for worker in 0..8i64 {
        let cache = cache.clone();
        handles.push(tokio::spawn(async move {
            for round in 0..50i64 {
                let key = project_key(round % 5);
                if (worker + round) % 3 == 0 {
                    cache.set(key, result_with(round)).await;
                } else if (worker + round) % 7 == 0 {
                    cache.invalidate(&key).await;
                } else {
                    cache.get(&key).await;
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = cache.stats().await;
    assert!(stats.total_entries <= 5);
    assert_eq!(stats.valid_entries, stats.total_entries);
}
