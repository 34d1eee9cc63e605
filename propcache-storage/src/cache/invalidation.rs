//! Commit-driven cache invalidation.
//!
//! The backing store calls [`InvalidationHook::on_mutation`] after each
//! committed create/update/delete and before the mutating call returns. The
//! hook removes the facade's cache entry outright; it never patches it.
//!
//! Removal alone does not close the race with a read that queried the store
//! before the commit and writes its result after the removal. The hook
//! therefore also advances an epoch shared with the facade. Every populating
//! read registers as a writer under the epoch it started in; while a writer
//! from an older epoch is still in flight for a key, readers must not trust
//! that key's cache entry, and the writer removes its own write before it
//! deregisters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use propcache_core::{CacheError, MutationKind, PropcacheResult};

use super::traits::{CacheBackend, MutationListener};

/// Invalidation bookkeeping shared by a facade and its hooks.
#[derive(Debug, Default)]
pub struct InvalidationState {
    epoch: AtomicU64,
    /// Keys whose removal failed. Reads bypass these until a delete succeeds.
    pending_purge: DashSet<String>,
    /// Start epochs of the populating writes in flight, per key.
    writers: DashMap<String, Vec<u64>>,
}

impl InvalidationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of invalidations seen so far.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub(crate) fn advance(&self) -> u64 {
        self.epoch.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn is_pending_purge(&self, key: &str) -> bool {
        self.pending_purge.contains(key)
    }

    pub(crate) fn mark_pending(&self, key: &str) {
        self.pending_purge.insert(key.to_string());
    }

    pub(crate) fn clear_pending(&self, key: &str) {
        self.pending_purge.remove(key);
    }

    /// Register a populating write for `key` under the current epoch.
    ///
    /// Must be called before the store query whose result will be written.
    pub(crate) fn begin_write(&self, key: &str) -> WriteGuard<'_> {
        let epoch = self.epoch();
        self.writers.entry(key.to_string()).or_default().push(epoch);
        WriteGuard {
            state: self,
            key: key.to_string(),
            epoch,
        }
    }

    /// Whether a write that started before the latest invalidation is still
    /// in flight for `key`. Its payload may land in the backend at any time.
    pub fn has_stale_writer(&self, key: &str) -> bool {
        let current = self.epoch();
        self.writers
            .get(key)
            .is_some_and(|epochs| epochs.iter().any(|&e| e < current))
    }

    /// Number of keys with writes in flight.
    pub fn writers_in_flight(&self) -> usize {
        self.writers.len()
    }

    fn end_write(&self, key: &str, epoch: u64) {
        if let Some(mut epochs) = self.writers.get_mut(key) {
            if let Some(pos) = epochs.iter().position(|&e| e == epoch) {
                epochs.swap_remove(pos);
            }
        }
        self.writers.remove_if(key, |_, epochs| epochs.is_empty());
    }
}

/// A registered populating write. Deregisters on drop.
#[derive(Debug)]
pub(crate) struct WriteGuard<'a> {
    state: &'a InvalidationState,
    key: String,
    epoch: u64,
}

impl WriteGuard<'_> {
    /// Whether an invalidation happened since registration.
    pub(crate) fn is_stale(&self) -> bool {
        self.state.epoch() != self.epoch
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.state.end_write(&self.key, self.epoch);
    }
}

/// Remove `key` from `cache`, advancing the epoch first.
///
/// A failed or timed-out delete leaves the key marked for purge so that
/// readers in this process stop trusting it.
pub(crate) async fn invalidate_key<C>(
    cache: &C,
    state: &InvalidationState,
    key: &str,
    timeout: Duration,
) -> PropcacheResult<()>
where
    C: CacheBackend + ?Sized,
{
    state.advance();
    purge_key(cache, state, key, timeout).await
}

/// Remove `key` from `cache` without advancing the epoch.
///
/// Same failure handling as [`invalidate_key`].
pub(crate) async fn purge_key<C>(
    cache: &C,
    state: &InvalidationState,
    key: &str,
    timeout: Duration,
) -> PropcacheResult<()>
where
    C: CacheBackend + ?Sized,
{
    let outcome = match tokio::time::timeout(timeout, cache.delete(key)).await {
        Ok(result) => result,
        Err(_) => Err(CacheError::backend(format!(
            "delete of {} timed out after {:?}",
            key, timeout
        ))),
    };

    match outcome {
        Ok(()) => {
            state.clear_pending(key);
            Ok(())
        }
        Err(e) => {
            state.mark_pending(key);
            Err(e)
        }
    }
}

/// Listener that drops the facade's cached full scan on every mutation.
///
/// All mutation kinds are handled identically.
pub struct InvalidationHook<C>
where
    C: CacheBackend + ?Sized,
{
    cache: Arc<C>,
    state: Arc<InvalidationState>,
    keys: Vec<String>,
    timeout: Duration,
}

impl<C> InvalidationHook<C>
where
    C: CacheBackend + ?Sized,
{
    /// Create a hook that removes `key`.
    pub fn new(
        cache: Arc<C>,
        state: Arc<InvalidationState>,
        key: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            cache,
            state,
            keys: vec![key.into()],
            timeout,
        }
    }

    /// Also remove these keys on every mutation.
    pub fn with_extra_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        for key in keys {
            let key = key.into();
            if !self.keys.contains(&key) {
                self.keys.push(key);
            }
        }
        self
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Drop every watched key. All keys are attempted even if one fails;
    /// the first failure is returned.
    pub async fn invalidate(&self, kind: MutationKind) -> PropcacheResult<()> {
        let mut first_err = None;

        for key in &self.keys {
            match invalidate_key(self.cache.as_ref(), &self.state, key, self.timeout).await {
                Ok(()) => {
                    tracing::info!(key = %key, mutation = %kind, "cache entry invalidated");
                }
                Err(e) => {
                    tracing::warn!(
                        key = %key,
                        mutation = %kind,
                        error = %e,
                        "cache invalidation failed; key marked for purge"
                    );
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<C> MutationListener for InvalidationHook<C>
where
    C: CacheBackend + ?Sized + 'static,
{
    async fn on_mutation(&self, kind: MutationKind) -> PropcacheResult<()> {
        self.invalidate(kind).await
    }
}
