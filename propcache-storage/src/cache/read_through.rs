//! Read-through cache facade.
//!
//! This module implements the core caching logic: serve from the cache
//! backend when it holds a live entry, otherwise query the backing store,
//! populate the cache with a TTL and return the fresh records.
//!
//! Cache-backend trouble never fails a read. Errors and timeouts on the
//! cache side degrade to a miss (fail-open); only the backing store can fail
//! a read.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use propcache_core::{CacheConfig, CacheError, PropcacheResult, PropertySnapshot};
use tokio::sync::Mutex;
use tokio::time::Instant;

use super::cache_read::CacheRead;
use super::invalidation::{
    invalidate_key, purge_key, InvalidationHook, InvalidationState, WriteGuard,
};
use super::metrics::MetricsReader;
use super::traits::{BackingStore, CacheBackend};

/// Outcome of a cache lookup.
enum Lookup {
    Hit(Vec<PropertySnapshot>),
    Miss,
    /// The backend failed or timed out (after retries).
    Unavailable,
}

/// Per-call time limits.
///
/// Each backend or store call is bounded by its configured timeout and, when
/// the caller supplied one, by whatever is left of the overall deadline.
#[derive(Debug, Clone, Copy)]
struct CallBudget {
    deadline: Option<Instant>,
    backend_timeout: Duration,
    store_timeout: Duration,
}

impl CallBudget {
    fn backend(&self) -> Duration {
        self.clamp(self.backend_timeout)
    }

    fn store(&self) -> Duration {
        self.clamp(self.store_timeout)
    }

    fn clamp(&self, limit: Duration) -> Duration {
        match self.deadline {
            Some(at) => limit.min(at.saturating_duration_since(Instant::now())),
            None => limit,
        }
    }
}

/// Read-through cache over a [`BackingStore`] and a [`CacheBackend`].
///
/// # Type Parameters
///
/// - `C`: The cache backend holding serialized snapshots
/// - `S`: The backing store queried on a miss
///
/// Both may be trait objects. Cloning is cheap and clones share the
/// collaborators and invalidation state.
///
/// # Example
///
/// ```ignore
/// let cache = ReadThroughCache::new(backend, store, CacheConfig::default());
/// cache.subscribe_invalidation();
///
/// let properties = cache.fetch_all().await?;
/// ```
pub struct ReadThroughCache<C, S>
where
    C: CacheBackend + ?Sized,
    S: BackingStore + ?Sized,
{
    /// The cache backend.
    cache: Arc<C>,
    /// The source of truth.
    store: Arc<S>,
    /// Cache configuration.
    config: CacheConfig,
    invalidation: Arc<InvalidationState>,
    /// One gate per key, used only when single-flight is enabled.
    flights: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl<C, S> ReadThroughCache<C, S>
where
    C: CacheBackend + ?Sized + 'static,
    S: BackingStore + ?Sized,
{
    /// Create a new read-through cache.
    pub fn new(cache: Arc<C>, store: Arc<S>, config: CacheConfig) -> Self {
        Self {
            cache,
            store,
            config,
            invalidation: Arc::new(InvalidationState::new()),
            flights: Arc::new(DashMap::new()),
        }
    }

    /// Create a new read-through cache with default configuration.
    pub fn with_defaults(cache: Arc<C>, store: Arc<S>) -> Self {
        Self::new(cache, store, CacheConfig::default())
    }

    /// Get the cache configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Get a reference to the cache backend.
    pub fn backend(&self) -> &C {
        &self.cache
    }

    /// Get a reference to the backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn invalidation_state(&self) -> &InvalidationState {
        &self.invalidation
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Fetch the full collection under the configured key.
    pub async fn fetch_all(&self) -> PropcacheResult<Vec<PropertySnapshot>> {
        self.fetch(&self.config.cache_key).await
    }

    /// Fetch the collection cached under `key`.
    ///
    /// A hit returns exactly the sequence stored by the latest population. A
    /// miss queries the store once and writes the result once.
    pub async fn fetch(&self, key: &str) -> PropcacheResult<Vec<PropertySnapshot>> {
        self.fetch_read(key).await.map(CacheRead::into_value)
    }

    /// Like [`fetch`](Self::fetch) but reports whether the cache served it.
    pub async fn fetch_read(&self, key: &str) -> PropcacheResult<CacheRead<Vec<PropertySnapshot>>> {
        self.read(key, self.budget(None)).await
    }

    /// Like [`fetch`](Self::fetch), bounded by an overall `deadline`.
    ///
    /// Running out of time on the cache side is a miss; running out of time
    /// on the store side is `BackingStoreUnavailable`.
    pub async fn fetch_with_deadline(
        &self,
        key: &str,
        deadline: Duration,
    ) -> PropcacheResult<Vec<PropertySnapshot>> {
        self.read(key, self.budget(Some(deadline)))
            .await
            .map(CacheRead::into_value)
    }

    fn budget(&self, deadline: Option<Duration>) -> CallBudget {
        CallBudget {
            deadline: deadline.map(|d| Instant::now() + d),
            backend_timeout: self.config.backend_timeout,
            store_timeout: self.config.store_timeout,
        }
    }

    async fn read(
        &self,
        key: &str,
        budget: CallBudget,
    ) -> PropcacheResult<CacheRead<Vec<PropertySnapshot>>> {
        if self.invalidation.is_pending_purge(key) && !self.retry_purge(key, budget).await {
            // A stale entry may still be in the backend. Do not read or write it.
            let records = self.query_store(key, budget).await?;
            return Ok(CacheRead::bypassed(records));
        }

        if self.invalidation.has_stale_writer(key) {
            // A pre-invalidation payload may land or be sitting in the backend.
            tracing::debug!(key, "older population still in flight, reading through");
            return self.populate(key, budget, false).await;
        }

        let bypassed = match self.lookup(key, budget).await {
            Lookup::Hit(records) => {
                tracing::debug!(key, count = records.len(), "cache hit");
                return Ok(CacheRead::from_cache(records));
            }
            Lookup::Miss => false,
            Lookup::Unavailable => true,
        };

        if self.config.single_flight && !bypassed {
            return self.populate_single_flight(key, budget).await;
        }
        self.populate(key, budget, bypassed).await
    }

    /// Look `key` up, retrying backend failures per the retry policy.
    async fn lookup(&self, key: &str, budget: CallBudget) -> Lookup {
        let retry = &self.config.retry;
        let mut attempt = 0u32;

        loop {
            let reason = match tokio::time::timeout(budget.backend(), self.cache.get(key)).await {
                Ok(Ok(Some(bytes))) => {
                    return match serde_json::from_slice::<Vec<PropertySnapshot>>(&bytes) {
                        Ok(records) => Lookup::Hit(records),
                        Err(e) => {
                            tracing::warn!(key, error = %e, "undecodable cache entry treated as miss");
                            Lookup::Miss
                        }
                    };
                }
                Ok(Ok(None)) => {
                    tracing::debug!(key, "cache miss");
                    return Lookup::Miss;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("get timed out after {:?}", budget.backend()),
            };

            if attempt >= retry.max_retries {
                tracing::warn!(key, attempts = attempt + 1, reason = %reason, "cache backend unavailable, failing open");
                return Lookup::Unavailable;
            }
            attempt += 1;
            tracing::debug!(key, attempt, reason = %reason, "retrying cache lookup");
            tokio::time::sleep(retry.backoff_for(attempt)).await;
        }
    }

    async fn populate_single_flight(
        &self,
        key: &str,
        budget: CallBudget,
    ) -> PropcacheResult<CacheRead<Vec<PropertySnapshot>>> {
        let gate = self
            .flights
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = self.lead_or_follow(key, budget, &gate).await;

        drop(gate);
        // Only the map still holds the gate: nobody is waiting on this key.
        self.flights
            .remove_if(key, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    async fn lead_or_follow(
        &self,
        key: &str,
        budget: CallBudget,
        gate: &Mutex<()>,
    ) -> PropcacheResult<CacheRead<Vec<PropertySnapshot>>> {
        let _guard = match gate.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                let guard = gate.lock().await;
                // Another caller populated while we waited.
                if !self.invalidation.has_stale_writer(key) {
                    if let Lookup::Hit(records) = self.lookup(key, budget).await {
                        tracing::debug!(key, "single-flight follower served from cache");
                        return Ok(CacheRead::from_cache(records));
                    }
                }
                guard
            }
        };

        self.populate(key, budget, false).await
    }

    /// Query the store and write the result back under `key`.
    async fn populate(
        &self,
        key: &str,
        budget: CallBudget,
        bypassed: bool,
    ) -> PropcacheResult<CacheRead<Vec<PropertySnapshot>>> {
        let writer = self.invalidation.begin_write(key);
        let records = self.query_store(key, budget).await?;
        self.write_back(key, &records, &writer, budget).await;
        drop(writer);

        Ok(if bypassed {
            CacheRead::bypassed(records)
        } else {
            CacheRead::from_storage(records)
        })
    }

    async fn query_store(
        &self,
        key: &str,
        budget: CallBudget,
    ) -> PropcacheResult<Vec<PropertySnapshot>> {
        let timeout = budget.store();
        match tokio::time::timeout(timeout, self.store.query_all()).await {
            Ok(Ok(records)) => {
                tracing::info!(key, count = records.len(), "properties retrieved from backing store");
                Ok(records)
            }
            Ok(Err(e)) => {
                tracing::error!(key, error = %e, "backing store query failed");
                Err(CacheError::BackingStoreUnavailable {
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                tracing::error!(key, ?timeout, "backing store query timed out");
                Err(CacheError::BackingStoreUnavailable {
                    reason: format!("query timed out after {:?}", timeout),
                })
            }
        }
    }

    /// Store `records` under `key`. Failures are logged, never returned.
    ///
    /// `writer` was registered before the store query. If an invalidation
    /// happened since, the records may predate a committed mutation and must
    /// not stay in the cache. The write stays registered until this returns,
    /// so readers skip the key meanwhile.
    async fn write_back(
        &self,
        key: &str,
        records: &[PropertySnapshot],
        writer: &WriteGuard<'_>,
        budget: CallBudget,
    ) {
        if writer.is_stale() {
            tracing::debug!(key, "skipping cache write, invalidated during query");
            return;
        }

        let bytes = match serde_json::to_vec(records) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to serialize records for cache");
                return;
            }
        };

        let timeout = budget.backend();
        let ttl = self.config.entry_ttl;
        match tokio::time::timeout(timeout, self.cache.set(key, &bytes, ttl)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "cache write failed, continuing without cache");
                return;
            }
            Err(_) => {
                // The write may still land; readers delete before trusting the key.
                tracing::warn!(key, ?timeout, "cache write timed out, continuing without cache");
                self.invalidation.mark_pending(key);
                return;
            }
        }

        if writer.is_stale() {
            tracing::debug!(key, "invalidated during cache write, removing entry");
            if let Err(e) = purge_key(
                self.cache.as_ref(),
                &self.invalidation,
                key,
                self.config.backend_timeout,
            )
            .await
            {
                tracing::warn!(key, error = %e, "failed to remove stale write");
            }
        }
    }

    /// Try again to remove a key whose invalidation failed earlier.
    async fn retry_purge(&self, key: &str, budget: CallBudget) -> bool {
        match tokio::time::timeout(budget.backend(), self.cache.delete(key)).await {
            Ok(Ok(())) => {
                self.invalidation.clear_pending(key);
                tracing::info!(key, "pending invalidation completed");
                true
            }
            Ok(Err(e)) => {
                tracing::warn!(key, error = %e, "pending invalidation still failing, bypassing cache");
                false
            }
            Err(_) => {
                tracing::warn!(key, "pending invalidation timed out, bypassing cache");
                false
            }
        }
    }

    // ========================================================================
    // INVALIDATION
    // ========================================================================

    /// Remove the entry for `key`. Removing an absent key succeeds.
    pub async fn invalidate(&self, key: &str) -> PropcacheResult<()> {
        invalidate_key(
            self.cache.as_ref(),
            &self.invalidation,
            key,
            self.config.backend_timeout,
        )
        .await
    }

    /// Build a hook that invalidates this facade's full-scan key.
    pub fn invalidation_hook(&self) -> InvalidationHook<C> {
        InvalidationHook::new(
            Arc::clone(&self.cache),
            Arc::clone(&self.invalidation),
            self.config.cache_key.clone(),
            self.config.backend_timeout,
        )
    }

    /// Register an invalidation hook with the backing store.
    pub fn subscribe_invalidation(&self) -> Arc<InvalidationHook<C>> {
        let hook = Arc::new(self.invalidation_hook());
        self.store.subscribe(hook.clone());
        hook
    }

    // ========================================================================
    // METRICS
    // ========================================================================

    /// A metrics reader over the same cache backend.
    pub fn metrics_reader(&self) -> MetricsReader<C> {
        MetricsReader::new(Arc::clone(&self.cache), self.config.backend_timeout)
    }
}

impl<C, S> Clone for ReadThroughCache<C, S>
where
    C: CacheBackend + ?Sized,
    S: BackingStore + ?Sized,
{
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            store: Arc::clone(&self.store),
            config: self.config.clone(),
            invalidation: Arc::clone(&self.invalidation),
            flights: Arc::clone(&self.flights),
        }
    }
}
