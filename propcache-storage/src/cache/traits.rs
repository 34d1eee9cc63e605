//! Collaborator traits for the cache layer.
//!
//! The facade never owns its collaborators' state: the cache backend and the
//! backing store are injected behind these traits and shared through `Arc`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use propcache_core::{MutationKind, PropcacheResult, PropertySnapshot, StoreError};

/// Cache backend trait for pluggable key/value stores.
///
/// This trait abstracts over different cache backends (in-memory, LMDB,
/// Redis). Implementations must be thread-safe and provide atomic
/// get/set/delete per key; the facade adds no locking of its own.
///
/// Values are opaque bytes. Serialization is the facade's concern.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Get the bytes stored under `key`.
    ///
    /// Expired entries are reported as `None`. Every call counts towards
    /// the server-wide hit or miss counter.
    async fn get(&self, key: &str) -> PropcacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any existing entry.
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> PropcacheResult<()>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> PropcacheResult<()>;

    /// Cumulative hit and miss counters for the whole backend.
    async fn server_stats(&self) -> PropcacheResult<ServerStats>;
}

/// Server-wide lookup counters reported by a cache backend.
///
/// These cover every key and every client of the backend, not just the
/// facade's own key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Number of lookups that found a live entry.
    pub hits: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
}

/// Source of truth the cache sits in front of.
#[async_trait]
pub trait BackingStore: Send + Sync {
    /// Fetch every record, in the store's natural order.
    async fn query_all(&self) -> Result<Vec<PropertySnapshot>, StoreError>;

    /// Register a listener notified after every committed mutation.
    ///
    /// Listeners run synchronously, after the commit is visible and before
    /// the mutating call returns to its caller.
    fn subscribe(&self, listener: Arc<dyn MutationListener>);
}

/// Receiver of commit notifications from a [`BackingStore`].
#[async_trait]
pub trait MutationListener: Send + Sync {
    async fn on_mutation(&self, kind: MutationKind) -> PropcacheResult<()>;
}
