//! Propcache Test Utilities
//!
//! Shared test infrastructure for the propcache workspace:
//! - Proptest generators for property records
//! - Fault-injecting cache backend and backing store wrappers
//! - Test fixtures for common scenarios
//! - Custom assertions for cache error variants

pub use propcache_core::{
    CacheConfig, CacheError, CacheMetricsSample, MutationKind, PropcacheResult, PropertyDraft,
    PropertyId, PropertySnapshot, StoreError, Timestamp,
};
pub use propcache_storage::{
    BackingStore, CacheBackend, InMemoryCacheBackend, InMemoryPropertyStore, MutationListener,
    ReadThroughCache, ServerStats,
};

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Cache backend wrapper with switchable failures, latency and call counts.
///
/// Delegates to an [`InMemoryCacheBackend`], so server-wide counters behave
/// like the real thing whenever a call gets through.
#[derive(Debug, Default)]
pub struct FlakyCacheBackend {
    inner: InMemoryCacheBackend,
    fail_get: AtomicBool,
    fail_set: AtomicBool,
    fail_delete: AtomicBool,
    fail_stats: AtomicBool,
    latency_ms: AtomicU64,
    gets: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

impl FlakyCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &InMemoryCacheBackend {
        &self.inner
    }

    pub fn fail_gets(&self, fail: bool) {
        self.fail_get.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sets(&self, fail: bool) {
        self.fail_set.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stats(&self, fail: bool) {
        self.fail_stats.store(fail, Ordering::SeqCst);
    }

    /// Fail every operation.
    pub fn fail_all(&self, fail: bool) {
        self.fail_gets(fail);
        self.fail_sets(fail);
        self.fail_deletes(fail);
        self.fail_stats(fail);
    }

    /// Delay every call by `latency` before it runs.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> u64 {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_calls(&self) -> u64 {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> u64 {
        self.deletes.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let ms = self.latency_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    fn check(flag: &AtomicBool, op: &str) -> PropcacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::backend(format!("injected {} failure", op)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl CacheBackend for FlakyCacheBackend {
    async fn get(&self, key: &str) -> PropcacheResult<Option<Vec<u8>>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Self::check(&self.fail_get, "get")?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> PropcacheResult<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Self::check(&self.fail_set, "set")?;
        self.inner.set(key, value, ttl).await
    }

    async fn delete(&self, key: &str) -> PropcacheResult<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Self::check(&self.fail_delete, "delete")?;
        self.inner.delete(key).await
    }

    async fn server_stats(&self) -> PropcacheResult<ServerStats> {
        self.pause().await;
        Self::check(&self.fail_stats, "stats")?;
        self.inner.server_stats().await
    }
}

/// Backing store wrapper that answers queries slowly.
///
/// The records are read when the query starts and returned after the delay,
/// which makes it easy to commit a mutation while a read is in flight.
pub struct SlowBackingStore {
    inner: Arc<InMemoryPropertyStore>,
    delay_ms: AtomicU64,
    queries: AtomicU64,
}

impl SlowBackingStore {
    pub fn new(inner: Arc<InMemoryPropertyStore>, delay: Duration) -> Self {
        let store = Self {
            inner,
            delay_ms: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        };
        store.set_delay(delay);
        store
    }

    pub fn inner(&self) -> &InMemoryPropertyStore {
        &self.inner
    }

    pub fn set_delay(&self, delay: Duration) {
        let ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.delay_ms.store(ms, Ordering::SeqCst);
    }

    /// Number of queries started through this wrapper.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackingStore for SlowBackingStore {
    async fn query_all(&self) -> Result<Vec<PropertySnapshot>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let records = self.inner.query_all().await?;
        let ms = self.delay_ms.load(Ordering::SeqCst);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
        Ok(records)
    }

    fn subscribe(&self, listener: Arc<dyn MutationListener>) {
        self.inner.subscribe(listener);
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for property records.

    use super::*;
    use proptest::prelude::*;

    /// Generate a Timestamp (DateTime<Utc>) between 2020 and 2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64, 0u32..1_000_000_000).prop_map(|(secs, nanos)| {
            chrono::DateTime::from_timestamp(secs, nanos).unwrap_or_else(Utc::now)
        })
    }

    /// Generate a non-negative price with two decimal places.
    pub fn arb_price() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000_000).prop_map(|cents| Decimal::new(cents, 2))
    }

    pub fn arb_draft() -> impl Strategy<Value = PropertyDraft> {
        (
            "[A-Za-z0-9 ]{1,40}",
            ".{0,200}",
            arb_price(),
            "[A-Za-z ,]{1,30}",
        )
            .prop_map(|(title, description, price, location)| {
                PropertyDraft::new(title, description, price, location)
            })
    }

    pub fn arb_snapshot(id: PropertyId) -> impl Strategy<Value = PropertySnapshot> {
        (arb_draft(), arb_timestamp())
            .prop_map(move |(draft, created_at)| draft.into_snapshot(id, created_at))
    }

    /// Generate a collection with unique ids in ascending order.
    pub fn arb_snapshots(max_len: usize) -> impl Strategy<Value = Vec<PropertySnapshot>> {
        prop::collection::vec((arb_draft(), arb_timestamp()), 0..=max_len).prop_map(|rows| {
            rows.into_iter()
                .zip(1..)
                .map(|((draft, created_at), id)| draft.into_snapshot(id, created_at))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// A listing with a price in whole currency units.
    pub fn draft(title: &str, price: i64) -> PropertyDraft {
        PropertyDraft::new(
            title,
            format!("{} description", title),
            Decimal::new(price * 100, 2),
            "Westlands, Nairobi",
        )
    }

    /// Three listings in creation order.
    pub fn sample_drafts() -> Vec<PropertyDraft> {
        vec![
            draft("Garden Cottage", 45_000),
            draft("City Loft", 120_000),
            draft("Beach House", 310_000),
        ]
    }

    /// A store preloaded with [`sample_drafts`].
    pub async fn seeded_store() -> Arc<InMemoryPropertyStore> {
        let store = Arc::new(InMemoryPropertyStore::new());
        for draft in sample_drafts() {
            // The store is fresh and available.
            let _ = store.create(draft).await;
        }
        store
    }

    /// Cache config with short timeouts for tests.
    pub fn fast_config() -> CacheConfig {
        CacheConfig::default()
            .with_backend_timeout(Duration::from_millis(50))
            .with_store_timeout(Duration::from_millis(500))
    }

    /// Facade over a fresh in-memory backend and `store`, subscribed to it.
    pub fn subscribed_cache<S>(
        store: Arc<S>,
        config: CacheConfig,
    ) -> (ReadThroughCache<InMemoryCacheBackend, S>, Arc<InMemoryCacheBackend>)
    where
        S: BackingStore + ?Sized,
    {
        let backend = Arc::new(InMemoryCacheBackend::new());
        let cache = ReadThroughCache::new(Arc::clone(&backend), store, config);
        cache.subscribe_invalidation();
        (cache, backend)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache error variants.

    use super::*;

    /// Assert that a result is a `BackingStoreUnavailable` error.
    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &PropcacheResult<T>) {
        match result {
            Err(CacheError::BackingStoreUnavailable { .. }) => {}
            other => panic!("Expected BackingStoreUnavailable, got: {:?}", other),
        }
    }

    /// Assert that a result is a `CacheBackendUnavailable` error.
    #[track_caller]
    pub fn assert_backend_unavailable<T: std::fmt::Debug>(result: &PropcacheResult<T>) {
        match result {
            Err(CacheError::CacheBackendUnavailable { .. }) => {}
            other => panic!("Expected CacheBackendUnavailable, got: {:?}", other),
        }
    }

    /// Assert that a result is a `MetricsUnavailable` error.
    #[track_caller]
    pub fn assert_metrics_unavailable<T: std::fmt::Debug>(result: &PropcacheResult<T>) {
        match result {
            Err(CacheError::MetricsUnavailable { .. }) => {}
            other => panic!("Expected MetricsUnavailable, got: {:?}", other),
        }
    }

    /// Assert a metrics sample's counters and ratio.
    #[track_caller]
    pub fn assert_sample(sample: &CacheMetricsSample, hits: u64, misses: u64, hit_ratio: f64) {
        assert_eq!(sample.hits, hits, "keyspace_hits");
        assert_eq!(sample.misses, misses, "keyspace_misses");
        assert!(
            (sample.hit_ratio - hit_ratio).abs() < 1e-9,
            "hit_ratio: expected {}, got {}",
            hit_ratio,
            sample.hit_ratio
        );
    }
}
