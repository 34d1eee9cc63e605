//! Read results carrying hit/miss metadata.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Where a read was served from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadSource {
    /// A live cache entry.
    Cache,
    /// The backing store, after a miss.
    Store,
    /// The backing store, because the cache backend could not be used.
    Bypass,
}

/// Result of a facade read, carrying where it came from.
///
/// [`ReadThroughCache::fetch`](super::ReadThroughCache::fetch) unwraps this;
/// callers that care about provenance use `fetch_read`.
#[derive(Debug, Clone)]
pub struct CacheRead<T> {
    value: T,
    /// When the value was produced by this read.
    read_at: DateTime<Utc>,
    source: ReadSource,
}

impl<T> CacheRead<T> {
    /// Create a new cache read from a cache hit.
    pub fn from_cache(value: T) -> Self {
        Self::new(value, ReadSource::Cache)
    }

    /// Create a new cache read from a storage fetch (cache miss).
    pub fn from_storage(value: T) -> Self {
        Self::new(value, ReadSource::Store)
    }

    /// Create a read served from storage while the cache was unavailable.
    pub fn bypassed(value: T) -> Self {
        Self::new(value, ReadSource::Bypass)
    }

    fn new(value: T, source: ReadSource) -> Self {
        Self {
            value,
            read_at: Utc::now(),
            source,
        }
    }

    /// Consume the wrapper and return the underlying value.
    pub fn into_value(self) -> T {
        self.value
    }

    /// Get a reference to the underlying value.
    pub fn value(&self) -> &T {
        &self.value
    }

    pub fn source(&self) -> ReadSource {
        self.source
    }

    /// Check if this was a cache hit.
    pub fn was_cache_hit(&self) -> bool {
        self.source == ReadSource::Cache
    }

    /// Check if this was a cache miss (fetched from storage).
    pub fn was_cache_miss(&self) -> bool {
        !self.was_cache_hit()
    }

    /// Check if the cache was bypassed because the backend failed.
    pub fn was_bypassed(&self) -> bool {
        self.source == ReadSource::Bypass
    }

    pub fn read_at(&self) -> DateTime<Utc> {
        self.read_at
    }

    /// Time elapsed since this read completed.
    pub fn age(&self) -> Duration {
        Utc::now()
            .signed_duration_since(self.read_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(T) -> U,
    {
        CacheRead {
            value: f(self.value),
            read_at: self.read_at,
            source: self.source,
        }
    }
}

impl<T> AsRef<T> for CacheRead<T> {
    fn as_ref(&self) -> &T {
        &self.value
    }
}
