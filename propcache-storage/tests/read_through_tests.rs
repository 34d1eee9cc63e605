//! End-to-end tests for the read-through cache, its invalidation hook and
//! the metrics reader, wired the way a service wires them.

use std::sync::Arc;
use std::time::Duration;

use proptest::prelude::*;
use propcache_core::{CacheConfig, DEFAULT_CACHE_KEY};
use propcache_storage::{
    InMemoryCacheBackend, InMemoryPropertyStore, LmdbCacheBackend, MutationListener,
    ReadThroughCache,
};
use propcache_test_utils::assertions::{assert_sample, assert_store_unavailable};
use propcache_test_utils::{fixtures, generators, FlakyCacheBackend, MutationKind, SlowBackingStore};
use tempfile::TempDir;

// ============================================================================
// HIT / MISS
// ============================================================================

#[tokio::test]
async fn test_empty_store_end_to_end_metrics() {
    let store = Arc::new(InMemoryPropertyStore::new());
    let (cache, backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());
    let metrics = cache.metrics_reader();

    let records = cache.fetch("all").await.expect("first fetch");
    assert!(records.is_empty());
    assert_eq!(backend.peek("all").await.as_deref(), Some(&b"[]"[..]));
    assert_sample(&metrics.sample_metrics().await.expect("sample"), 0, 1, 0.0);

    let records = cache.fetch("all").await.expect("second fetch");
    assert!(records.is_empty());
    assert_sample(&metrics.sample_metrics().await.expect("sample"), 1, 1, 50.0);
    assert_eq!(store.query_count(), 1);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_hit_returns_populated_sequence(records in generators::arb_snapshots(12)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("runtime");

        let (first, second, queries) = runtime.block_on(async {
            let store = Arc::new(InMemoryPropertyStore::with_records(records.clone()));
            let backend = Arc::new(InMemoryCacheBackend::new());
            let cache = ReadThroughCache::new(backend, Arc::clone(&store), CacheConfig::default());

            let first = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("miss");
            let second = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("hit");
            (first, second, store.query_count())
        });

        prop_assert!(first.was_cache_miss());
        prop_assert!(second.was_cache_hit());
        prop_assert_eq!(first.value(), &records);
        prop_assert_eq!(second.value(), &records);
        prop_assert_eq!(queries, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn test_expired_entry_is_refetched() {
    let store = fixtures::seeded_store().await;
    let config = CacheConfig::default().with_ttl(Duration::from_secs(10));
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), config);

    cache.fetch_all().await.expect("populate");
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch").was_cache_hit());

    tokio::time::advance(Duration::from_secs(2)).await;
    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_cache_miss());
    assert_eq!(read.value().len(), 3);
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_lmdb_backend_end_to_end() {
    let temp_dir = TempDir::new().expect("TempDir creation should succeed");
    let backend = Arc::new(LmdbCacheBackend::new(temp_dir.path(), 10).expect("lmdb"));
    let store = fixtures::seeded_store().await;
    let cache = ReadThroughCache::new(backend, Arc::clone(&store), CacheConfig::default());
    cache.subscribe_invalidation();

    let first = cache.fetch_all().await.expect("miss");
    let second = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("hit");
    assert!(second.was_cache_hit());
    assert_eq!(second.value(), &first);

    store.delete(first[0].id).await.expect("delete");
    let third = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("refetch");
    assert!(third.was_cache_miss());
    assert_eq!(third.value().len(), 2);

    let sample = cache.metrics_reader().sample_metrics().await.expect("sample");
    assert_sample(&sample, 1, 2, 33.33);
}

// ============================================================================
// INVALIDATION
// ============================================================================

#[tokio::test]
async fn test_every_mutation_kind_invalidates() {
    let store = fixtures::seeded_store().await;
    let (cache, backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());

    cache.fetch_all().await.expect("populate");
    let created = store.create(fixtures::draft("Studio", 30_000)).await.expect("create");
    assert!(!backend.contains_key(DEFAULT_CACHE_KEY).await);

    cache.fetch_all().await.expect("populate");
    store
        .update(created.id, fixtures::draft("Studio", 28_000))
        .await
        .expect("update");
    assert!(!backend.contains_key(DEFAULT_CACHE_KEY).await);

    cache.fetch_all().await.expect("populate");
    store.delete(created.id).await.expect("delete");
    assert!(!backend.contains_key(DEFAULT_CACHE_KEY).await);

    assert_eq!(cache.fetch_all().await.expect("fetch").len(), 3);
}

#[tokio::test]
async fn test_double_invalidation_then_miss() {
    let store = fixtures::seeded_store().await;
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());
    let hook = cache.invalidation_hook();

    cache.fetch_all().await.expect("populate");
    hook.on_mutation(MutationKind::Updated).await.expect("first");
    hook.on_mutation(MutationKind::Updated).await.expect("second");

    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_cache_miss());
    assert_eq!(store.query_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_straggling_read_does_not_resurrect_stale_data() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(
        Arc::clone(&inner),
        Duration::from_millis(100),
    ));
    let (cache, backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());

    let straggler = tokio::spawn({
        let cache = cache.clone();
        async move { cache.fetch_all().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(store.query_count(), 1);

    // Commits while the straggler holds a pre-commit snapshot.
    inner
        .create(fixtures::draft("New Build", 99_000))
        .await
        .expect("create");

    let stale = straggler.await.expect("join").expect("fetch");
    assert_eq!(stale.len(), 3);
    assert!(!backend.contains_key(DEFAULT_CACHE_KEY).await);

    let fresh = cache.fetch_all().await.expect("fetch");
    assert_eq!(fresh.len(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_read_during_straggler_reads_through() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(
        Arc::clone(&inner),
        Duration::from_millis(100),
    ));
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());

    let straggler = tokio::spawn({
        let cache = cache.clone();
        async move { cache.fetch_all().await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    inner
        .create(fixtures::draft("New Build", 99_000))
        .await
        .expect("create");

    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_cache_miss());
    assert_eq!(read.value().len(), 4);
    assert_eq!(store.query_count(), 2);

    assert_eq!(straggler.await.expect("join").expect("fetch").len(), 3);
    assert_eq!(cache.invalidation_state().writers_in_flight(), 0);
}

#[tokio::test]
async fn test_failed_invalidation_never_serves_stale_entry() {
    let store = fixtures::seeded_store().await;
    let backend = Arc::new(FlakyCacheBackend::new());
    let cache = ReadThroughCache::new(
        Arc::clone(&backend),
        Arc::clone(&store),
        fixtures::fast_config(),
    );
    cache.subscribe_invalidation();
    cache.fetch_all().await.expect("populate");

    backend.fail_deletes(true);
    store
        .create(fixtures::draft("Penthouse", 900_000))
        .await
        .expect("commit stands despite failed invalidation");

    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_bypassed());
    assert_eq!(read.value().len(), 4);
    assert!(backend.inner().contains_key(DEFAULT_CACHE_KEY).await);

    backend.fail_deletes(false);
    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_cache_miss());
    assert_eq!(read.value().len(), 4);

    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fetch");
    assert!(read.was_cache_hit());
    assert_eq!(read.value().len(), 4);
}

// ============================================================================
// FAILURE HANDLING
// ============================================================================

#[tokio::test]
async fn test_unreachable_backend_serves_store_data() {
    let store = fixtures::seeded_store().await;
    let backend = Arc::new(FlakyCacheBackend::new());
    backend.fail_all(true);
    let cache = ReadThroughCache::new(Arc::clone(&backend), Arc::clone(&store), fixtures::fast_config());

    let records = cache.fetch_all().await.expect("fail open");
    assert_eq!(records.len(), 3);
    assert_eq!(backend.set_calls(), 1);

    let err = cache.metrics_reader().sample_metrics().await;
    propcache_test_utils::assertions::assert_metrics_unavailable(&err);
}

#[tokio::test]
async fn test_cache_write_failure_is_swallowed() {
    let store = fixtures::seeded_store().await;
    let backend = Arc::new(FlakyCacheBackend::new());
    backend.fail_sets(true);
    let cache = ReadThroughCache::new(Arc::clone(&backend), Arc::clone(&store), fixtures::fast_config());

    assert_eq!(cache.fetch_all().await.expect("fetch").len(), 3);
    assert_eq!(cache.fetch_all().await.expect("fetch").len(), 3);
    assert_eq!(store.query_count(), 2);
}

#[tokio::test]
async fn test_store_failure_writes_nothing() {
    let store = fixtures::seeded_store().await;
    store.set_available(false);
    let backend = Arc::new(FlakyCacheBackend::new());
    let cache = ReadThroughCache::new(Arc::clone(&backend), Arc::clone(&store), fixtures::fast_config());

    assert_store_unavailable(&cache.fetch_all().await);
    assert_eq!(backend.set_calls(), 0);
    assert!(backend.inner().is_empty().await);
}

#[tokio::test(start_paused = true)]
async fn test_slow_backend_is_a_miss() {
    let store = fixtures::seeded_store().await;
    let backend = Arc::new(FlakyCacheBackend::new());
    backend.set_latency(Duration::from_secs(1));
    let cache = ReadThroughCache::new(Arc::clone(&backend), Arc::clone(&store), fixtures::fast_config());

    let read = cache.fetch_read(DEFAULT_CACHE_KEY).await.expect("fail open");
    assert!(read.was_bypassed());
    assert_eq!(read.value().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_is_a_hard_failure() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(inner, Duration::from_secs(2)));
    let backend = Arc::new(FlakyCacheBackend::new());
    let cache = ReadThroughCache::new(Arc::clone(&backend), store, fixtures::fast_config());

    assert_store_unavailable(&cache.fetch_all().await);
    assert_eq!(backend.set_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_caller_deadline_bounds_store_query() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(inner, Duration::from_millis(300)));
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());

    assert_store_unavailable(
        &cache
            .fetch_with_deadline(DEFAULT_CACHE_KEY, Duration::from_millis(100))
            .await,
    );

    let records = cache
        .fetch_with_deadline(DEFAULT_CACHE_KEY, Duration::from_secs(1))
        .await
        .expect("within deadline");
    assert_eq!(records.len(), 3);
}

// ============================================================================
// SINGLE-FLIGHT
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_single_flight_collapses_concurrent_misses() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(inner, Duration::from_millis(100)));
    let config = CacheConfig::default().with_single_flight(true);
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), config);

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch_all().await })
        })
        .collect();

    for handle in handles {
        let records = handle.await.expect("join").expect("fetch");
        assert_eq!(records.len(), 3);
    }
    assert_eq!(store.query_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_without_single_flight_every_miss_queries() {
    let inner = fixtures::seeded_store().await;
    let store = Arc::new(SlowBackingStore::new(inner, Duration::from_millis(100)));
    let (cache, _backend) = fixtures::subscribed_cache(Arc::clone(&store), CacheConfig::default());

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.fetch_all().await })
        })
        .collect();
    for handle in handles {
        handle.await.expect("join").expect("fetch");
    }

    assert!(store.query_count() >= 2);
    assert_eq!(store.inner().query_count(), store.query_count());
}
